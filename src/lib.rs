//! # gird_orm
//!
//! A small relational ORM with two halves:
//!
//! - a **query builder** that turns a declarative call chain over a table
//!   descriptor into one parameterized statement, including nested JSON
//!   projections for `BelongsTo` and `HasMany` relations;
//! - a **schema synchronizer** that creates missing tables and adds missing
//!   columns, retrying tables whose foreign keys point at tables that do not
//!   exist yet.
//!
//! PostgreSQL (`$n` placeholders) and SQLite (`?`) are supported behind the
//! [`Database`] trait.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! gird_orm = { version = "0.1", features = ["sqlite"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```rust,no_run
//! use gird_orm::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let schema = Schema::new()
//!         .table(
//!             Table::new("users")
//!                 .column("id", int().primary_key())
//!                 .column("name", text())
//!                 .relation("posts", Relation::has_many("posts", "author_id")),
//!         )
//!         .table(
//!             Table::new("posts")
//!                 .column("id", int().primary_key())
//!                 .column("title", text())
//!                 .column("author_id", int().references("users", "id")),
//!         );
//!
//!     let db = SqliteDatabase::new();
//!     db.connect(":memory:").await?;
//!     Migrator::new(&db, &schema).sync().await?;
//!
//!     let users = schema.get("users").ok_or_else(|| DatabaseError::TableNotFound("users".into()))?;
//!     let stmt = QueryBuilder::for_database(users, &db)
//!         .schema(&schema)
//!         .where_all([("name", "Alice")])
//!         .with("posts")?
//!         .to_sql()?;
//!
//!     for row in db.fetch(&stmt).await? {
//!         println!("{:?}", row.get("posts"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Project Structure
//!
//! ```text
//! src/
//! ├── core/
//! │   ├── config.rs          # DatabaseConfig (figment)
//! │   ├── database.rs        # Database trait, ConnectionBuilder
//! │   ├── database_types.rs  # Dialects and their placeholders
//! │   ├── error.rs           # DatabaseError
//! │   ├── migration.rs       # Migrator (schema synchronizer)
//! │   ├── model.rs           # Model facade
//! │   ├── query_builder.rs   # QueryBuilder, Statement
//! │   ├── schema.rs          # Table, Relation, Schema registry
//! │   ├── transaction.rs     # TransactionGuard
//! │   └── value.rs           # DatabaseValue
//! ├── backends/
//! │   ├── postgres.rs
//! │   └── sqlite.rs
//! └── lib.rs
//! ```

/// Core types and traits
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use gird_orm::prelude::*;
///
/// let users = Table::new("users").column("id", int().primary_key());
/// let stmt = QueryBuilder::new(&users, DatabaseType::Sqlite).to_sql().unwrap();
/// assert_eq!(stmt.sql, "SELECT \"users\".* FROM \"users\"");
/// ```
pub mod prelude {
    pub use crate::core::schema::{big_int, bool, int, json, real, text, timestamp};
    pub use crate::core::{
        ConnectionBuilder, Database, DatabaseConfig, DatabaseError, DatabaseResult, DatabaseRow,
        DatabaseType, DatabaseValue, Filter, FindOptions, Migrator, Model, OrderDirection,
        Predicate, QueryBuilder, Relation, Result, Schema, Statement, SyncReport, Table,
        TransactionGuard,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::backends::SqliteDatabase;

    #[cfg(feature = "postgres")]
    pub use crate::backends::PostgresDatabase;
}

// Re-export at root level for convenience
pub use core::{
    ConnectionBuilder, Database, DatabaseConfig, DatabaseError, DatabaseResult, DatabaseRow,
    DatabaseType, DatabaseValue, Migrator, Model, QueryBuilder, Result, Schema, Statement, Table,
    TransactionGuard,
};

#[cfg(feature = "sqlite")]
pub use backends::SqliteDatabase;

#[cfg(feature = "postgres")]
pub use backends::PostgresDatabase;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_imports() {
        use prelude::*;

        let db_type = DatabaseType::Sqlite;
        assert_eq!(db_type.to_str(), "sqlite");
        assert_eq!(db_type.placeholder(3), "?");

        let table = Table::new("flags").column("on", bool());
        assert_eq!(table.column_names().count(), 1);
    }

    #[test]
    fn test_value_conversions() {
        use prelude::*;

        let val: DatabaseValue = 42.into();
        assert_eq!(val.as_int(), Some(42));

        let val: DatabaseValue = "test".into();
        assert_eq!(val.as_string(), "test");

        let val: DatabaseValue = true.into();
        assert_eq!(val.as_bool(), Some(true));
    }
}
