//! Error types for the database system
//!
//! This module defines all error types that can occur while building queries,
//! talking to a backend, or synchronizing a schema.

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection error (generic)
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// Query execution error
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Query timeout
    #[error("Query timeout after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// A statement referenced a table that does not exist (yet)
    #[error("Undefined table: {0}")]
    UndefinedTable(String),

    /// Type conversion error
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Invalid connection string
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Table not found in the schema registry
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Column not found
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// `with()` named a relation the table does not declare
    #[error("Relation '{relation}' not found on {table}")]
    RelationNotFound { relation: String, table: String },

    /// A filter could not be turned into a condition
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Transaction error
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// A synchronizer pass made no progress
    #[error("Schema sync deadlocked; tables depend on each other or on a missing table: {}", .tables.join(", "))]
    Deadlock { tables: Vec<String> },

    /// The synchronizer exceeded its pass budget
    #[error("Schema sync timed out after {passes} passes; still pending: {}", .tables.join(", "))]
    SyncTimeout { passes: usize, tables: Vec<String> },

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    SqliteError(#[source] rusqlite::Error),

    /// PostgreSQL error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    PostgresError(#[source] tokio_postgres::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl DatabaseError {
    /// Create a new connection error (generic)
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        DatabaseError::ConnectionError(msg.into())
    }

    /// Create a connection timeout error
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        DatabaseError::ConnectionTimeout { timeout_ms }
    }

    /// Create a new query error
    pub fn query<S: Into<String>>(msg: S) -> Self {
        DatabaseError::QueryError(msg.into())
    }

    /// Create a query timeout error
    pub fn query_timeout(timeout_ms: u64) -> Self {
        DatabaseError::QueryTimeout { timeout_ms }
    }

    /// Create an undefined table error
    pub fn undefined_table<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UndefinedTable(msg.into())
    }

    /// Create a new type mismatch error
    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        DatabaseError::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create a relation lookup error
    pub fn relation_not_found(relation: impl Into<String>, table: impl Into<String>) -> Self {
        DatabaseError::RelationNotFound {
            relation: relation.into(),
            table: table.into(),
        }
    }

    /// Create an invalid filter error
    pub fn invalid_filter<S: Into<String>>(msg: S) -> Self {
        DatabaseError::InvalidFilter(msg.into())
    }

    /// Create a new transaction error
    pub fn transaction<S: Into<String>>(msg: S) -> Self {
        DatabaseError::TransactionError(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Config(msg.into())
    }

    /// Create a new unsupported operation error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        DatabaseError::UnsupportedOperation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Other(msg.into())
    }

    /// Whether this failure means a referenced table does not exist yet.
    ///
    /// Backends report this as [`DatabaseError::UndefinedTable`]; anything else
    /// falls back to matching the message the way the drivers phrase it.
    /// The schema synchronizer postpones a table on exactly this class.
    pub fn is_undefined_relation(&self) -> bool {
        if matches!(self, DatabaseError::UndefinedTable(_)) {
            return true;
        }

        let message = self.to_string().to_lowercase();
        message.contains("no such table") || names_missing_relation(&message)
    }

    /// Whether this is a synchronizer deadlock or timeout
    pub fn is_convergence_error(&self) -> bool {
        matches!(
            self,
            DatabaseError::Deadlock { .. } | DatabaseError::SyncTimeout { .. }
        )
    }
}

/// Matches `relation "name" does not exist` but not
/// `column "c" of relation "name" does not exist`.
fn names_missing_relation(message: &str) -> bool {
    message.match_indices("relation \"").any(|(start, prefix)| {
        let rest = &message[start + prefix.len()..];
        let preceded_by_column = message[..start].trim_end().ends_with(" of");
        match rest.find('"') {
            Some(end) => !preceded_by_column && rest[end + 1..].starts_with(" does not exist"),
            None => false,
        }
    })
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        if message.contains("no such table") {
            DatabaseError::UndefinedTable(message)
        } else {
            DatabaseError::SqliteError(err)
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for DatabaseError {
    fn from(err: tokio_postgres::Error) -> Self {
        use tokio_postgres::error::SqlState;

        if err.code() == Some(&SqlState::UNDEFINED_TABLE) {
            let message = err
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| err.to_string());
            DatabaseError::UndefinedTable(message)
        } else {
            DatabaseError::PostgresError(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DatabaseError::connection("Failed to connect");
        assert!(matches!(err, DatabaseError::ConnectionError(_)));

        let err = DatabaseError::query("Invalid SQL");
        assert!(matches!(err, DatabaseError::QueryError(_)));

        let err = DatabaseError::type_mismatch("i32", "String");
        assert!(matches!(err, DatabaseError::TypeMismatch { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = DatabaseError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err = DatabaseError::relation_not_found("comments", "users");
        assert_eq!(err.to_string(), "Relation 'comments' not found on users");

        let err = DatabaseError::Deadlock {
            tables: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().ends_with("a, b"));
    }

    #[test]
    fn test_undefined_relation_classification() {
        assert!(DatabaseError::undefined_table("users").is_undefined_relation());
        assert!(DatabaseError::query("relation \"users\" does not exist").is_undefined_relation());
        assert!(DatabaseError::query("no such table: users").is_undefined_relation());

        assert!(!DatabaseError::query("permission denied for schema public").is_undefined_relation());
        assert!(!DatabaseError::query("column \"age\" does not exist").is_undefined_relation());
        assert!(!DatabaseError::query("column \"age\" of relation \"users\" does not exist")
            .is_undefined_relation());
        assert!(!DatabaseError::Deadlock { tables: vec![] }.is_undefined_relation());
    }

    #[test]
    fn test_convergence_classification() {
        assert!(DatabaseError::Deadlock { tables: vec![] }.is_convergence_error());
        assert!(DatabaseError::SyncTimeout {
            passes: 3,
            tables: vec![]
        }
        .is_convergence_error());
        assert!(!DatabaseError::undefined_table("x").is_convergence_error());
    }
}
