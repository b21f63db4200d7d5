//! Connection configuration
//!
//! [`DatabaseConfig`] is assembled with figment: built-in defaults, then the
//! conventional `DATABASE_URL` variable, then `GIRD_`-prefixed variables
//! (`GIRD_DATABASE_URL`, `GIRD_DIALECT`), later sources winning.

use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// `postgres://...`, `sqlite://path`, or a bare SQLite path.
    /// Env: `DATABASE_URL` or `GIRD_DATABASE_URL`. Default: `sqlite://gird.db`.
    #[serde(default)]
    pub database_url: String,

    /// Explicit dialect; inferred from the URL when unset.
    /// Env: `GIRD_DIALECT`.
    #[serde(default)]
    pub dialect: Option<DatabaseType>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://gird.db".to_string(),
            dialect: None,
        }
    }
}

impl DatabaseConfig {
    /// Defaults, then `DATABASE_URL`, then `GIRD_*`
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(DatabaseConfig::default()))
            .merge(Env::raw().only(&["database_url"]))
            .merge(Env::prefixed("GIRD_"))
    }

    /// Load from the environment, with defaults
    pub fn from_env() -> Result<Self> {
        Self::figment()
            .extract()
            .map_err(|e| DatabaseError::config(e.to_string()))
    }

    /// Dialect to use, explicit or inferred from the URL scheme
    pub fn dialect(&self) -> Result<DatabaseType> {
        if let Some(dialect) = self.dialect {
            return Ok(dialect);
        }

        let url = self.database_url.trim();
        match url.split_once("://") {
            Some(("postgres" | "postgresql", _)) => Ok(DatabaseType::Postgres),
            Some(("sqlite", _)) => Ok(DatabaseType::Sqlite),
            Some((scheme, _)) => Err(DatabaseError::InvalidConnectionString(format!(
                "unsupported scheme '{}'",
                scheme
            ))),
            None => Ok(DatabaseType::Sqlite),
        }
    }

    /// String to hand to the backend's `connect`
    ///
    /// Strips the `sqlite://` or `sqlite:` scheme, which rusqlite does not
    /// understand; other URLs are passed through.
    pub fn connection_string(&self) -> Result<String> {
        let url = self.database_url.trim();
        if url.is_empty() {
            return Err(DatabaseError::InvalidConnectionString(
                "database_url is empty".to_string(),
            ));
        }

        Ok(match self.dialect()? {
            DatabaseType::Sqlite => url
                .strip_prefix("sqlite://")
                .or_else(|| url.strip_prefix("sqlite:"))
                .unwrap_or(url)
                .to_string(),
            DatabaseType::Postgres => url.to_string(),
        })
    }
}
