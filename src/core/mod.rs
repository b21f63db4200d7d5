//! Core types and traits
//!
//! Error types, the dialect adapter trait, values, schema descriptors, the
//! query builder, the schema synchronizer and the model facade.

pub mod config;
pub mod database;
pub mod database_types;
pub mod error;
pub mod migration;
pub mod model;
pub mod query_builder;
pub mod schema;
pub mod transaction;
pub mod value;

// Re-export commonly used types
pub use config::DatabaseConfig;
pub use database::{ConnectionBuilder, Database};
pub use database_types::DatabaseType;
pub use error::{DatabaseError, Result};
pub use migration::{Migrator, SyncReport, TableSync};
pub use model::{FindOptions, Model};
pub use query_builder::{Filter, Operator, OrderDirection, Predicate, QueryBuilder, Statement};
pub use schema::{Column, ColumnType, Relation, RelationKind, Schema, Table};
pub use transaction::TransactionGuard;
pub use value::{DatabaseResult, DatabaseRow, DatabaseValue, Record};
