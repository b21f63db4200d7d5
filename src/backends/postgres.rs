//! PostgreSQL database backend implementation
//!
//! Uses tokio-postgres over a single client. Parameters are encoded against
//! the type the server inferred for each placeholder, so an integer value
//! binds to `INT2`, `INT4` or `INT8` columns alike. `json`/`jsonb` columns,
//! including relation projections, decode to [`DatabaseValue::Json`].

use crate::core::{
    database::Database, database_types::DatabaseType, error::DatabaseError, error::Result,
    value::DatabaseResult, value::DatabaseRow, value::DatabaseValue,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_postgres::types::{private::BytesMut, to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

/// Default timeout for database operations (30 seconds)
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// PostgreSQL database implementation
pub struct PostgresDatabase {
    client: Arc<Mutex<Option<Client>>>,
    /// Only written while the client lock is held
    in_transaction: AtomicBool,
}

/// Parameter encoder driven by the server-side parameter type
#[derive(Debug)]
struct PgParam<'a>(&'a DatabaseValue);

fn mismatch(value: &DatabaseValue, ty: &Type) -> BoxError {
    format!("cannot encode {} value as {}", value.type_name(), ty).into()
}

fn encode_integer(value: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => value.to_string().to_sql(ty, out),
        _ => Err(mismatch(&DatabaseValue::Long(value), ty)),
    }
}

fn timestamp_from_micros(micros: i64) -> SystemTime {
    let offset = Duration::from_micros(micros.unsigned_abs());
    if micros >= 0 {
        UNIX_EPOCH + offset
    } else {
        UNIX_EPOCH - offset
    }
}

fn micros_from_timestamp(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros() as i64,
        Err(e) => -(e.duration().as_micros() as i64),
    }
}

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError>
    where
        Self: Sized,
    {
        match self.0 {
            DatabaseValue::Null => Ok(IsNull::Yes),
            DatabaseValue::Bool(v) => v.to_sql(ty, out),
            DatabaseValue::Int(v) => encode_integer(i64::from(*v), ty, out),
            DatabaseValue::Long(v) => encode_integer(*v, ty, out),
            DatabaseValue::Float(v) => match *ty {
                Type::FLOAT4 => v.to_sql(ty, out),
                Type::FLOAT8 => f64::from(*v).to_sql(ty, out),
                _ => Err(mismatch(self.0, ty)),
            },
            DatabaseValue::Double(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => v.to_sql(ty, out),
                _ => Err(mismatch(self.0, ty)),
            },
            DatabaseValue::String(v) => match *ty {
                Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out),
                _ => v.as_str().to_sql(ty, out),
            },
            DatabaseValue::Bytes(v) => v.as_slice().to_sql(ty, out),
            DatabaseValue::Timestamp(v) => match *ty {
                Type::TIMESTAMP | Type::TIMESTAMPTZ => timestamp_from_micros(*v).to_sql(ty, out),
                _ => encode_integer(*v, ty, out),
            },
            DatabaseValue::Json(v) => match *ty {
                Type::JSON | Type::JSONB => v.to_sql(ty, out),
                _ => v.to_string().to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl PostgresDatabase {
    /// Create a new, unconnected PostgreSQL database instance
    pub fn new() -> Self {
        Self {
            client: Arc::new(Mutex::new(None)),
            in_transaction: AtomicBool::new(false),
        }
    }

    fn decode(row: &Row, idx: usize, ty: &Type) -> std::result::Result<DatabaseValue, tokio_postgres::Error> {
        let value = match *ty {
            Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(DatabaseValue::Bool),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)?
                .map(|v| DatabaseValue::Int(i32::from(v))),
            Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(DatabaseValue::Int),
            Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(DatabaseValue::Long),
            Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(DatabaseValue::Float),
            Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(DatabaseValue::Double),
            Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(DatabaseValue::Bytes),
            Type::JSON | Type::JSONB => row
                .try_get::<_, Option<serde_json::Value>>(idx)?
                .map(DatabaseValue::Json),
            Type::TIMESTAMP | Type::TIMESTAMPTZ => row
                .try_get::<_, Option<SystemTime>>(idx)?
                .map(|t| DatabaseValue::Timestamp(micros_from_timestamp(t))),
            _ => match row.try_get::<_, Option<String>>(idx) {
                Ok(v) => v.map(DatabaseValue::String),
                Err(_) => {
                    tracing::debug!(column = idx, ty = %ty, "unsupported column type, returning null");
                    None
                }
            },
        };
        Ok(value.unwrap_or(DatabaseValue::Null))
    }

    /// Convert a tokio_postgres Row to a DatabaseRow
    fn row_to_database_row(row: &Row) -> Result<DatabaseRow> {
        let mut db_row = DatabaseRow::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let value = Self::decode(row, idx, column.type_())?;
            db_row.insert(column.name().to_string(), value);
        }
        Ok(db_row)
    }

    fn rows_to_result(rows: &[Row]) -> Result<DatabaseResult> {
        rows.iter().map(Self::row_to_database_row).collect()
    }

    /// Run a control statement under the client lock, flipping the flag on success
    async fn transaction_control(&self, sql: &str, expect_active: bool) -> Result<()> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        if self.in_transaction.load(Ordering::Acquire) != expect_active {
            return Err(DatabaseError::transaction(if expect_active {
                "Not in a transaction"
            } else {
                "Already in a transaction"
            }));
        }

        timed(client.batch_execute(sql)).await?;
        self.in_transaction.store(!expect_active, Ordering::Release);
        Ok(())
    }
}

/// Apply the operation timeout to a driver future
async fn timed<T, F>(future: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, tokio_postgres::Error>>,
{
    match tokio::time::timeout(DEFAULT_OPERATION_TIMEOUT, future).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(DatabaseError::query_timeout(
            DEFAULT_OPERATION_TIMEOUT.as_millis() as u64,
        )),
    }
}

impl Default for PostgresDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, connection_string: &str) -> Result<()> {
        {
            let mut client = self.client.lock().await;
            *client = None;
            self.in_transaction.store(false, Ordering::Release);
        }

        let connected = tokio::time::timeout(
            DEFAULT_OPERATION_TIMEOUT,
            tokio_postgres::connect(connection_string, NoTls),
        )
        .await
        .map_err(|_| DatabaseError::connection_timeout(DEFAULT_OPERATION_TIMEOUT.as_millis() as u64))?;

        let (client, connection) =
            connected.map_err(|e| DatabaseError::connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection closed with error");
            }
        });

        *self.client.lock().await = Some(client);
        tracing::debug!("postgres connection established");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client
            .try_lock()
            .map(|client| client.as_ref().map(|c| !c.is_closed()).unwrap_or(false))
            .unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        *client = None;
        self.in_transaction.store(false, Ordering::Release);
        tracing::debug!("postgres connection closed");
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        timed(client.execute(query, &[])).await
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let rows = timed(client.query(query, &[])).await?;
        Self::rows_to_result(&rows)
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let encoded: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            encoded.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let rows = timed(client.query(query, &param_refs)).await?;
        Self::rows_to_result(&rows)
    }

    async fn execute_with_params(&self, query: &str, params: &[DatabaseValue]) -> Result<u64> {
        let client = self.client.lock().await;
        let client = client
            .as_ref()
            .ok_or_else(|| DatabaseError::connection("Not connected to database"))?;

        let encoded: Vec<PgParam<'_>> = params.iter().map(PgParam).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> =
            encoded.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        timed(client.execute(query, &param_refs)).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.transaction_control("BEGIN", false).await
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
