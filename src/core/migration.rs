//! Schema synchronization
//!
//! [`Migrator`] brings a live database in line with a [`Schema`] registry:
//! missing tables are created, missing columns are added. Nothing is ever
//! dropped or altered in place.
//!
//! Tables are tried in registration order. A table that references a table
//! which does not exist yet, whether caught by the catalog check before its
//! DDL or by the database itself, is postponed to the next pass, so
//! foreign-key order sorts itself out without a dependency graph. A pass that
//! makes no progress is a deadlock, and the number of passes is capped at
//! twice the number of tables.
//!
//! # Example
//!
//! ```rust,no_run
//! use gird_orm::core::migration::Migrator;
//! use gird_orm::core::schema::{int, text, Schema, Table};
//! use gird_orm::prelude::*;
//!
//! # async fn example() -> Result<()> {
//! let db = SqliteDatabase::new();
//! db.connect(":memory:").await?;
//!
//! let schema = Schema::new()
//!     .table(
//!         Table::new("posts")
//!             .column("id", int().primary_key())
//!             .column("author_id", int().references("users", "id")),
//!     )
//!     .table(
//!         Table::new("users")
//!             .column("id", int().primary_key())
//!             .column("name", text()),
//!     );
//!
//! let report = Migrator::new(&db, &schema).sync().await?;
//! assert_eq!(report.created.len(), 2);
//! # Ok(())
//! # }
//! ```

use super::database::Database;
use super::error::{DatabaseError, Result};
use super::schema::{Schema, Table};
use super::value::DatabaseValue;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// What one `sync_table` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSync {
    /// The table did not exist and was created
    Created,
    /// The table existed; these declared columns were added
    Altered(Vec<String>),
    /// The table already matched its descriptor
    Unchanged,
}

/// Outcome of a successful [`Migrator::sync`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Number of passes executed
    pub passes: usize,
    /// Tables created, in creation order
    pub created: Vec<String>,
    /// `(table, column)` pairs added, in order
    pub altered: Vec<(String, String)>,
}

impl SyncReport {
    /// Whether the run issued no DDL at all
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.altered.is_empty()
    }
}

/// Synchronizes a schema registry against a live database
pub struct Migrator<'a, D: Database> {
    db: &'a D,
    schema: &'a Schema,
}

impl<'a, D: Database> Migrator<'a, D> {
    /// Create a synchronizer for `schema` over `db`
    pub fn new(db: &'a D, schema: &'a Schema) -> Self {
        Self { db, schema }
    }

    /// Run passes until every registered table is in sync
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::Deadlock`] when a pass postpones every remaining table
    /// - [`DatabaseError::SyncTimeout`] when the pass cap is exceeded
    /// - the adapter's error, unchanged, for any failure that is not a missing
    ///   referenced table
    pub async fn sync(&self) -> Result<SyncReport> {
        let mut pending: Vec<&Table> = self.schema.tables().collect();
        let max_passes = pending.len() * 2;
        let mut report = SyncReport::default();

        info!(
            tables = pending.len(),
            dialect = %self.db.database_type(),
            "schema sync started"
        );

        while !pending.is_empty() {
            if report.passes >= max_passes {
                let tables = table_names(&pending);
                error!(passes = report.passes, pending = ?tables, "schema sync exceeded its pass budget");
                return Err(DatabaseError::SyncTimeout {
                    passes: report.passes,
                    tables,
                });
            }
            report.passes += 1;
            debug!(pass = report.passes, pending = pending.len(), "sync pass");

            let mut postponed = Vec::new();
            let mut progressed = 0usize;

            for table in pending {
                match self.sync_table(table).await {
                    Ok(outcome) => {
                        progressed += 1;
                        match outcome {
                            TableSync::Created => report.created.push(table.name().to_string()),
                            TableSync::Altered(columns) => report.altered.extend(
                                columns
                                    .into_iter()
                                    .map(|c| (table.name().to_string(), c)),
                            ),
                            TableSync::Unchanged => {}
                        }
                    }
                    Err(e) if e.is_undefined_relation() => {
                        warn!(
                            table = table.name(),
                            pass = report.passes,
                            error = %e,
                            "postponing table until its references exist"
                        );
                        postponed.push(table);
                    }
                    Err(e) => {
                        error!(table = table.name(), error = %e, "schema sync failed");
                        return Err(e);
                    }
                }
            }

            if progressed == 0 && !postponed.is_empty() {
                let tables = table_names(&postponed);
                error!(pending = ?tables, "schema sync deadlocked");
                return Err(DatabaseError::Deadlock { tables });
            }

            pending = postponed;
        }

        info!(
            passes = report.passes,
            created = report.created.len(),
            altered = report.altered.len(),
            "schema sync finished"
        );
        Ok(report)
    }

    /// Create `table` if missing, otherwise add any missing declared columns
    pub async fn sync_table(&self, table: &Table) -> Result<TableSync> {
        let dialect = self.db.database_type();

        if !self.table_exists(table.name()).await? {
            for target in table.dependencies() {
                self.require_referenced(table, target).await?;
            }
            let sql = table.create_table_sql(dialect);
            debug!(table = table.name(), %sql, "creating table");
            self.db.execute(&sql).await?;
            info!(table = table.name(), "created table");
            return Ok(TableSync::Created);
        }

        debug!(table = table.name(), "table exists, comparing columns");
        let live = self.live_columns(table.name()).await?;
        let missing: Vec<&str> = table
            .column_names()
            .filter(|column| !live.contains(&column.to_lowercase()))
            .collect();

        // Check every new reference before issuing any ALTER
        for column in &missing {
            if let Some(fk) = table.get_column(column).and_then(|c| c.foreign_key()) {
                self.require_referenced(table, &fk.table).await?;
            }
        }

        let mut added = Vec::new();
        for column in missing {
            if let Some(sql) = table.add_column_sql(column, dialect) {
                debug!(table = table.name(), column, %sql, "adding column");
                self.db.execute(&sql).await?;
                info!(table = table.name(), column, "added column");
                added.push(column.to_string());
            }
        }

        Ok(if added.is_empty() {
            TableSync::Unchanged
        } else {
            TableSync::Altered(added)
        })
    }

    /// Fail with `UndefinedTable` when `target` is not live yet
    ///
    /// SQLite accepts DDL naming a missing table and only complains on the
    /// first write, so references are checked against the catalog here.
    async fn require_referenced(&self, table: &Table, target: &str) -> Result<()> {
        if target == table.name() || self.table_exists(target).await? {
            return Ok(());
        }
        debug!(table = table.name(), references = target, "referenced table missing");
        Err(DatabaseError::undefined_table(format!(
            "relation \"{}\" does not exist",
            target
        )))
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let sql = self.db.database_type().table_exists_query();
        let rows = self
            .db
            .query_with_params(&sql, &[DatabaseValue::from(name)])
            .await?;
        Ok(!rows.is_empty())
    }

    /// Live column names, lowercased
    async fn live_columns(&self, name: &str) -> Result<HashSet<String>> {
        let sql = self.db.database_type().columns_query();
        let rows = self
            .db
            .query_with_params(&sql, &[DatabaseValue::from(name)])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("column_name"))
            .filter_map(DatabaseValue::as_str)
            .map(str::to_lowercase)
            .collect())
    }
}

fn table_names(tables: &[&Table]) -> Vec<String> {
    tables.iter().map(|t| t.name().to_string()).collect()
}
