//! Transaction guard for automatic rollback on drop
//!
//! RAII-style alternative to [`Database::transaction`]: the guard owns an
//! `Arc` to the connection and rolls back when dropped uncommitted.

use super::database::Database;
use super::error::{DatabaseError, Result};
use super::query_builder::Statement;
use super::value::{DatabaseResult, DatabaseValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Transaction guard that automatically rolls back on drop if not committed
///
/// # Example
///
/// ```rust,no_run
/// use gird_orm::prelude::*;
/// use std::sync::Arc;
///
/// # async fn transfer(db: Arc<SqliteDatabase>) -> Result<()> {
/// let tx = TransactionGuard::begin(Arc::clone(&db)).await?;
/// tx.execute("UPDATE accounts SET balance = balance - 100 WHERE id = 1").await?;
/// tx.execute("UPDATE accounts SET balance = balance + 100 WHERE id = 2").await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
pub struct TransactionGuard<D: Database + 'static> {
    db: Arc<D>,
    committed: AtomicBool,
    rolled_back: AtomicBool,
}

impl<D: Database + 'static> TransactionGuard<D> {
    /// Begin a new transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the database is not connected or a transaction is
    /// already active.
    pub async fn begin(db: Arc<D>) -> Result<Self> {
        db.begin_transaction().await?;
        tracing::debug!(dialect = %db.database_type(), "transaction guard started");

        Ok(Self {
            db,
            committed: AtomicBool::new(false),
            rolled_back: AtomicBool::new(false),
        })
    }

    fn ensure_active(&self) -> Result<()> {
        if self.committed.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction("transaction already committed"));
        }
        if self.rolled_back.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction("transaction already rolled back"));
        }
        Ok(())
    }

    /// Execute a raw statement within the transaction
    pub async fn execute(&self, query: &str) -> Result<u64> {
        self.ensure_active()?;
        self.db.execute(query).await
    }

    /// Execute a parameterized statement within the transaction
    pub async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        self.ensure_active()?;
        self.db.execute_with_params(query, params).await
    }

    /// Query within the transaction
    pub async fn query(&self, query: &str) -> Result<DatabaseResult> {
        self.ensure_active()?;
        self.db.query(query).await
    }

    /// Query with parameters within the transaction
    pub async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        self.ensure_active()?;
        self.db.query_with_params(query, params).await
    }

    /// Run a compiled statement and return its rows
    pub async fn fetch(&self, statement: &Statement) -> Result<DatabaseResult> {
        self.ensure_active()?;
        self.db.fetch(statement).await
    }

    /// Run a compiled statement and return the affected row count
    pub async fn run(&self, statement: &Statement) -> Result<u64> {
        self.ensure_active()?;
        self.db.run(statement).await
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        if self.rolled_back.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction(
                "cannot commit a rolled back transaction",
            ));
        }

        self.db.commit().await?;
        self.committed.store(true, Ordering::Release);
        tracing::debug!("transaction guard committed");
        Ok(())
    }

    /// Explicitly rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        if self.committed.load(Ordering::Acquire) {
            return Err(DatabaseError::transaction(
                "cannot rollback a committed transaction",
            ));
        }

        self.db.rollback().await?;
        self.rolled_back.store(true, Ordering::Release);
        tracing::debug!("transaction guard rolled back");
        Ok(())
    }

    /// Check if the transaction has been committed
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Check if the transaction has been rolled back
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::Acquire)
    }
}

impl<D: Database + 'static> Drop for TransactionGuard<D> {
    fn drop(&mut self) {
        if self.committed.load(Ordering::Acquire) || self.rolled_back.load(Ordering::Acquire) {
            return;
        }
        self.rolled_back.store(true, Ordering::Release);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("transaction guard dropped without commit; rolling back");
                let db = Arc::clone(&self.db);
                handle.spawn(async move {
                    if let Err(e) = db.rollback().await {
                        tracing::error!(error = %e, "automatic rollback failed");
                    }
                });
            }
            Err(_) => {
                // the server discards the transaction when the connection closes
                tracing::warn!(
                    "transaction guard dropped outside a tokio runtime; rollback left to connection close"
                );
            }
        }
    }
}
