//! SQLite database backend implementation
//!
//! Every rusqlite call runs on tokio's blocking pool behind a per-call
//! timeout. Missing-table failures surface as
//! [`DatabaseError::UndefinedTable`] through the `From<rusqlite::Error>`
//! conversion.

use crate::core::{
    database::Database, database_types::DatabaseType, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

type SharedConnection = Arc<Mutex<Option<Connection>>>;

/// SQLite database implementation
pub struct SqliteDatabase {
    connection: SharedConnection,
    /// Only written while the connection lock is held
    in_transaction: Arc<AtomicBool>,
}

impl SqliteDatabase {
    /// Create a new, unconnected SQLite database instance
    pub fn new() -> Self {
        Self {
            connection: Arc::new(Mutex::new(None)),
            in_transaction: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Convert a rusqlite Row to a DatabaseRow
    fn row_to_database_row(row: &Row) -> rusqlite::Result<DatabaseRow> {
        let mut db_row = DatabaseRow::new();
        let column_count = row.as_ref().column_count();

        for i in 0..column_count {
            let column_name = row.as_ref().column_name(i)?.to_string();
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => DatabaseValue::Null,
                rusqlite::types::ValueRef::Integer(v) => DatabaseValue::Long(v),
                rusqlite::types::ValueRef::Real(v) => DatabaseValue::Double(v),
                rusqlite::types::ValueRef::Text(v) => {
                    DatabaseValue::String(String::from_utf8_lossy(v).to_string())
                }
                rusqlite::types::ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
            };
            db_row.insert(column_name, value);
        }

        Ok(db_row)
    }

    /// Convert DatabaseValue to rusqlite parameter
    fn value_to_param(value: &DatabaseValue) -> Box<dyn rusqlite::ToSql> {
        match value {
            DatabaseValue::Null => Box::new(None::<i64>),
            DatabaseValue::Bool(v) => Box::new(*v),
            DatabaseValue::Int(v) => Box::new(*v),
            DatabaseValue::Long(v) => Box::new(*v),
            DatabaseValue::Float(v) => Box::new(*v),
            DatabaseValue::Double(v) => Box::new(*v),
            DatabaseValue::String(v) => Box::new(v.clone()),
            DatabaseValue::Bytes(v) => Box::new(v.clone()),
            DatabaseValue::Timestamp(v) => Box::new(*v),
            // stored as TEXT, readable by SQLite's json functions
            DatabaseValue::Json(v) => Box::new(v.to_string()),
        }
    }

    fn fetch_rows(conn: &Connection, query: &str, params: &[DatabaseValue]) -> Result<DatabaseResult> {
        let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
            params.iter().map(Self::value_to_param).collect();

        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map(
            params_from_iter(rusqlite_params.iter()),
            Self::row_to_database_row,
        )?;

        let mut results = Vec::new();
        for row_result in rows {
            results.push(row_result?);
        }
        Ok(results)
    }

    /// Run `f` against the open connection on the blocking pool
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection_arc = Arc::clone(&self.connection);
        blocking(move || {
            let connection = connection_arc.blocking_lock();
            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;
            f(conn)
        })
        .await
    }

    /// Run a transaction control statement, flipping the flag only on success
    async fn transaction_control(&self, sql: &'static str, expect_active: bool) -> Result<()> {
        let connection_arc = Arc::clone(&self.connection);
        let in_transaction_arc = Arc::clone(&self.in_transaction);

        blocking(move || {
            let connection = connection_arc.blocking_lock();

            let conn = connection
                .as_ref()
                .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

            if in_transaction_arc.load(Ordering::Acquire) != expect_active {
                return Err(DatabaseError::transaction(if expect_active {
                    "Not in a transaction"
                } else {
                    "Already in a transaction"
                }));
            }

            conn.execute(sql, [])?;
            in_transaction_arc.store(!expect_active, Ordering::Release);
            Ok(())
        })
        .await
    }
}

/// Offload a blocking closure, aborting it once the operation timeout elapses
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(f);

    tokio::select! {
        result = &mut task => {
            result.map_err(|e| DatabaseError::other(format!("Task join error: {}", e)))?
        }
        _ = tokio::time::sleep(DEFAULT_OPERATION_TIMEOUT) => {
            task.abort();
            Err(DatabaseError::query_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))
        }
    }
}

impl Default for SqliteDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        {
            let mut connection = self.connection.lock().await;
            *connection = None;
            self.in_transaction.store(false, Ordering::Release);
        }

        let path = connection_string.to_string();
        let connection_arc = Arc::clone(&self.connection);

        let opened = blocking(move || -> Result<()> {
            let conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON", [])?;

            let mut connection = connection_arc.blocking_lock();
            *connection = Some(conn);
            Ok(())
        })
        .await;

        match opened {
            Ok(()) => {
                tracing::debug!(path = %connection_string, "sqlite connection opened");
                Ok(())
            }
            Err(DatabaseError::QueryTimeout { timeout_ms }) => {
                Err(DatabaseError::connection_timeout(timeout_ms))
            }
            Err(e) => Err(e),
        }
    }

    fn is_connected(&self) -> bool {
        self.connection
            .try_lock()
            .map(|conn| conn.is_some())
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut connection = self.connection.lock().await;
        *connection = None;
        self.in_transaction.store(false, Ordering::Release);
        tracing::debug!("sqlite connection closed");
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let query = query.to_string();
        self.with_connection(move |conn| Ok(conn.execute(&query, [])? as u64))
            .await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        let query = query.to_string();
        self.with_connection(move |conn| Self::fetch_rows(conn, &query, &[]))
            .await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let query = query.to_string();
        let params = params.to_vec();
        self.with_connection(move |conn| Self::fetch_rows(conn, &query, &params))
            .await
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let query = query.to_string();
        let params = params.to_vec();
        self.with_connection(move |conn| {
            let rusqlite_params: Vec<Box<dyn rusqlite::ToSql>> =
                params.iter().map(Self::value_to_param).collect();

            let mut stmt = conn.prepare(&query)?;
            let affected = stmt.execute(params_from_iter(rusqlite_params.iter()))?;
            Ok(affected as u64)
        })
        .await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_control("BEGIN TRANSACTION", false).await
    }

    async fn commit(&self) -> Result<()> {
        self.transaction_control("COMMIT", true).await
    }

    async fn rollback(&self) -> Result<()> {
        self.transaction_control("ROLLBACK", true).await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }
}

impl Drop for SqliteDatabase {
    fn drop(&mut self) {
        // best effort; Drop cannot await
        if self.in_transaction.load(Ordering::Acquire) {
            if let Ok(connection) = self.connection.try_lock() {
                if let Some(conn) = connection.as_ref() {
                    let _ = conn.execute("ROLLBACK", []);
                }
            }
        }
    }
}
