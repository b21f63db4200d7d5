//! Scripted in-memory adapter for synchronizer tests
//!
//! Speaks the Postgres dialect, answers the two catalog queries from an
//! in-memory table map and rejects DDL that references a table it does not
//! know, the way Postgres does with SQLSTATE 42P01.

#![allow(dead_code)]

use async_trait::async_trait;
use gird_orm::core::database::Database;
use gird_orm::core::database_types::DatabaseType;
use gird_orm::core::error::{DatabaseError, Result};
use gird_orm::core::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct FakeState {
    tables: BTreeMap<String, Vec<String>>,
    statements: Vec<String>,
    created: Vec<String>,
    fail_on: Option<(String, String)>,
    in_transaction: bool,
}

/// In-memory catalog that records every DDL statement it receives
#[derive(Default)]
pub struct FakeDatabase {
    state: Mutex<FakeState>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a table with the given live columns
    pub fn with_table(self, name: &str, columns: &[&str]) -> Self {
        self.state.lock().tables.insert(
            name.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Fail any DDL mentioning `"table"` with a plain query error carrying `message`
    pub fn fail_on(&self, table: &str, message: &str) {
        self.state.lock().fail_on = Some((format!("\"{}\"", table), message.to_string()));
    }

    /// Every DDL statement attempted, in order
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Tables created, in creation order
    pub fn created(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }

    pub fn columns(&self, table: &str) -> Option<Vec<String>> {
        self.state.lock().tables.get(table).cloned()
    }

    pub fn clear_log(&self) {
        let mut state = self.state.lock();
        state.statements.clear();
        state.created.clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|s| s.starts_with(prefix))
            .count()
    }

    fn apply_ddl(state: &mut FakeState, sql: &str) -> Result<()> {
        if let Some((needle, message)) = &state.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(DatabaseError::query(message.clone()));
            }
        }

        for target in referenced_tables(sql) {
            if !state.tables.contains_key(&target) {
                return Err(DatabaseError::undefined_table(format!(
                    "relation \"{}\" does not exist",
                    target
                )));
            }
        }

        if let Some(rest) = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ") {
            let name = first_quoted(rest).unwrap_or_default();
            let body = rest
                .find('(')
                .and_then(|start| rest.rfind(')').map(|end| &rest[start + 1..end]))
                .unwrap_or_default();
            let columns = body
                .split(", ")
                .filter(|part| part.starts_with('"'))
                .filter_map(first_quoted)
                .collect();
            if !state.tables.contains_key(&name) {
                state.tables.insert(name.clone(), columns);
                state.created.push(name);
            }
        } else if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            let name = first_quoted(rest).unwrap_or_default();
            let column = rest
                .split_once(" ADD COLUMN ")
                .and_then(|(_, tail)| first_quoted(tail))
                .unwrap_or_default();
            state
                .tables
                .get_mut(&name)
                .ok_or_else(|| {
                    DatabaseError::undefined_table(format!("relation \"{}\" does not exist", name))
                })?
                .push(column);
        }
        Ok(())
    }
}

fn first_quoted(s: &str) -> Option<String> {
    let start = s.find('"')? + 1;
    let len = s[start..].find('"')?;
    Some(s[start..start + len].to_string())
}

fn referenced_tables(sql: &str) -> Vec<String> {
    sql.match_indices("REFERENCES ")
        .filter_map(|(idx, kw)| first_quoted(&sql[idx + kw.len()..]))
        .collect()
}

fn single_column_rows(column: &str, values: impl IntoIterator<Item = String>) -> DatabaseResult {
    values
        .into_iter()
        .map(|v| {
            let mut row = DatabaseRow::new();
            row.insert(column.to_string(), DatabaseValue::String(v));
            row
        })
        .collect()
}

#[async_trait]
impl Database for FakeDatabase {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn connect(&self, _connection_string: &str) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, query: &str) -> Result<u64> {
        let mut state = self.state.lock();
        state.statements.push(query.to_string());
        Self::apply_ddl(&mut state, query)?;
        Ok(0)
    }

    async fn query(&self, query: &str) -> Result<DatabaseResult> {
        self.query_with_params(query, &[]).await
    }

    async fn query_with_params(
        &self,
        query: &str,
        params: &[DatabaseValue],
    ) -> Result<DatabaseResult> {
        let state = self.state.lock();
        let name = params
            .first()
            .and_then(DatabaseValue::as_str)
            .unwrap_or_default();

        if query.contains("information_schema.tables") {
            let found = state.tables.contains_key(name).then(|| name.to_string());
            return Ok(single_column_rows("table_name", found));
        }
        if query.contains("information_schema.columns") {
            let columns = state.tables.get(name).cloned().unwrap_or_default();
            return Ok(single_column_rows("column_name", columns));
        }
        Ok(Vec::new())
    }

    async fn execute_with_params(&self, query: &str, _params: &[DatabaseValue]) -> Result<u64> {
        self.execute(query).await
    }

    async fn begin_transaction(&self) -> Result<()> {
        self.state.lock().in_transaction = true;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.state.lock().in_transaction = false;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.state.lock().in_transaction = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }
}
