//! Database type definitions
//!
//! This module defines the SQL dialects supported by the system and the
//! handful of places where their syntax differs: positional placeholders,
//! identity columns and the catalog queries used for introspection.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DatabaseType {
    /// PostgreSQL database
    Postgres = 1,
    /// SQLite database
    Sqlite = 3,
}

impl DatabaseType {
    /// Convert database type to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::Postgres => "postgres",
            DatabaseType::Sqlite => "sqlite",
        }
    }

    /// Positional parameter token for the 0-based `index`
    ///
    /// ```
    /// use gird_orm::DatabaseType;
    ///
    /// assert_eq!(DatabaseType::Postgres.placeholder(0), "$1");
    /// assert_eq!(DatabaseType::Sqlite.placeholder(4), "?");
    /// ```
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DatabaseType::Postgres => format!("${}", index + 1),
            DatabaseType::Sqlite => "?".to_string(),
        }
    }

    /// Column definition suffix for an auto-generated integer primary key
    pub(crate) fn identity_column(&self, big: bool) -> &'static str {
        match (self, big) {
            (DatabaseType::Postgres, false) => "SERIAL PRIMARY KEY",
            (DatabaseType::Postgres, true) => "BIGSERIAL PRIMARY KEY",
            (DatabaseType::Sqlite, _) => "INTEGER PRIMARY KEY",
        }
    }

    /// Catalog query returning one row when the table given as the single
    /// parameter exists
    pub(crate) fn table_exists_query(&self) -> String {
        match self {
            DatabaseType::Postgres => format!(
                "SELECT table_name::text AS table_name FROM information_schema.tables \
                 WHERE table_name = {} AND table_schema = 'public'",
                self.placeholder(0)
            ),
            DatabaseType::Sqlite => format!(
                "SELECT name AS table_name FROM sqlite_master \
                 WHERE type = 'table' AND name = {}",
                self.placeholder(0)
            ),
        }
    }

    /// Catalog query listing the live columns of the table given as the
    /// single parameter, one `column_name` per row
    pub(crate) fn columns_query(&self) -> String {
        match self {
            DatabaseType::Postgres => format!(
                "SELECT column_name::text AS column_name FROM information_schema.columns \
                 WHERE table_name = {} AND table_schema = 'public'",
                self.placeholder(0)
            ),
            DatabaseType::Sqlite => format!(
                "SELECT name AS column_name FROM pragma_table_info({})",
                self.placeholder(0)
            ),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_to_str() {
        assert_eq!(DatabaseType::Postgres.to_str(), "postgres");
        assert_eq!(DatabaseType::Sqlite.to_str(), "sqlite");
    }

    #[test]
    fn test_database_type_from_str() {
        assert_eq!(
            "postgres".parse::<DatabaseType>().ok(),
            Some(DatabaseType::Postgres)
        );
        assert_eq!(
            "PostgreSQL".parse::<DatabaseType>().ok(),
            Some(DatabaseType::Postgres)
        );
        assert_eq!(
            "sqlite3".parse::<DatabaseType>().ok(),
            Some(DatabaseType::Sqlite)
        );
        assert_eq!("mongodb".parse::<DatabaseType>().ok(), None);
    }

    #[test]
    fn test_placeholders() {
        let pg: Vec<String> = (0..3).map(|i| DatabaseType::Postgres.placeholder(i)).collect();
        assert_eq!(pg, vec!["$1", "$2", "$3"]);

        let lite: Vec<String> = (0..3).map(|i| DatabaseType::Sqlite.placeholder(i)).collect();
        assert_eq!(lite, vec!["?", "?", "?"]);
    }

    #[test]
    fn test_catalog_queries_are_parameterized() {
        assert!(DatabaseType::Postgres
            .table_exists_query()
            .contains("table_name = $1"));
        assert!(DatabaseType::Sqlite
            .columns_query()
            .contains("pragma_table_info(?)"));
    }
}
