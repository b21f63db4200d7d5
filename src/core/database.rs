//! Database trait and connection management
//!
//! This module defines the dialect adapter every backend implements. The
//! query builder, the schema synchronizer and the model facade only ever talk
//! to a backend through this trait.

use super::database_types::DatabaseType;
use super::error::Result;
use super::query_builder::Statement;
use super::value::{DatabaseResult, DatabaseValue};
use async_trait::async_trait;

/// Core database trait that all database backends must implement
///
/// Backends must surface a statement that references a missing table as
/// [`DatabaseError::UndefinedTable`](super::error::DatabaseError::UndefinedTable);
/// the schema synchronizer relies on it to postpone dependent tables.
#[async_trait]
pub trait Database: Send + Sync {
    /// Get the database type
    fn database_type(&self) -> DatabaseType;

    /// Positional parameter token for the 0-based `index`
    fn placeholder(&self, index: usize) -> String {
        self.database_type().placeholder(index)
    }

    /// Connect to the database with the given connection string
    async fn connect(&self, connection_string: &str) -> Result<()>;

    /// Check if connected to the database
    fn is_connected(&self) -> bool;

    /// Disconnect from the database and release the connection
    async fn disconnect(&self) -> Result<()>;

    /// Execute a statement that doesn't return rows (DDL, mostly)
    ///
    /// # Security Warning
    ///
    /// The SQL is run as given. Use `execute_with_params()` for anything that
    /// carries user input.
    async fn execute(&self, query: &str) -> Result<u64>;

    /// Execute a SELECT query and return results
    ///
    /// # Security Warning
    ///
    /// The SQL is run as given. Use `query_with_params()` for anything that
    /// carries user input.
    async fn query(&self, query: &str) -> Result<DatabaseResult>;

    /// Run a parameterized statement and return its rows
    ///
    /// Statements with `RETURNING` must go through this method.
    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult>;

    /// Run a parameterized statement and return the affected row count
    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64>;

    /// Run a compiled statement and return its rows
    async fn fetch(&self, statement: &Statement) -> Result<DatabaseResult> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "fetch");
        self.query_with_params(&statement.sql, &statement.params)
            .await
    }

    /// Run a compiled statement and return the affected row count
    async fn run(&self, statement: &Statement) -> Result<u64> {
        tracing::debug!(sql = %statement.sql, params = statement.params.len(), "run");
        self.execute_with_params(&statement.sql, &statement.params)
            .await
    }

    /// Begin a transaction
    async fn begin_transaction(&self) -> Result<()>;

    /// Commit the current transaction
    async fn commit(&self) -> Result<()>;

    /// Rollback the current transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if currently in a transaction
    fn in_transaction(&self) -> bool;

    /// Run `f` inside a transaction on this connection
    ///
    /// Commits when `f` returns `Ok`; rolls back and returns the closure's
    /// error otherwise. A rollback failure is logged, not returned.
    ///
    /// The generic closure makes the trait not object-safe; use
    /// [`TransactionGuard`](super::transaction::TransactionGuard) or the
    /// begin/commit/rollback methods when that matters.
    async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(
                &'a Self,
            ) -> std::pin::Pin<
                Box<dyn std::future::Future<Output = Result<T>> + Send + 'a>,
            > + Send,
        T: Send,
    {
        self.begin_transaction().await?;
        tracing::debug!(dialect = %self.database_type(), "transaction started");

        match f(self).await {
            Ok(result) => {
                self.commit().await?;
                tracing::debug!("transaction committed");
                Ok(result)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                } else {
                    tracing::debug!(error = %e, "transaction rolled back");
                }
                Err(e)
            }
        }
    }
}

/// Database connection builder
pub struct ConnectionBuilder {
    db_type: DatabaseType,
    host: Option<String>,
    port: Option<u16>,
    database: Option<String>,
    username: Option<String>,
    password: Option<String>,
    options: std::collections::BTreeMap<String, String>,
}

impl ConnectionBuilder {
    /// Create a new connection builder for the specified database type
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            options: std::collections::BTreeMap::new(),
        }
    }

    /// Set the database host
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the database port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name (the file path for SQLite)
    pub fn database<S: Into<String>>(mut self, database: S) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the username
    pub fn username<S: Into<String>>(mut self, username: S) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a custom option, e.g. `sslmode`
    pub fn option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Build the connection string
    ///
    /// SQLite gets a plain path (`:memory:` by default); Postgres gets a
    /// `key=value` string as understood by `tokio_postgres::connect`.
    pub fn build_connection_string(&self) -> String {
        match self.db_type {
            DatabaseType::Sqlite => self
                .database
                .clone()
                .unwrap_or_else(|| ":memory:".to_string()),
            DatabaseType::Postgres => {
                let mut parts = Vec::new();
                if let Some(host) = &self.host {
                    parts.push(format!("host={}", host));
                }
                if let Some(port) = self.port {
                    parts.push(format!("port={}", port));
                }
                if let Some(database) = &self.database {
                    parts.push(format!("dbname={}", database));
                }
                if let Some(username) = &self.username {
                    parts.push(format!("user={}", username));
                }
                if let Some(password) = &self.password {
                    parts.push(format!("password={}", password));
                }
                for (key, value) in &self.options {
                    parts.push(format!("{}={}", key, value));
                }
                parts.join(" ")
            }
        }
    }
}
