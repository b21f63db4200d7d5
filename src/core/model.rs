//! Table-bound CRUD facade
//!
//! [`Model`] pairs one [`Table`] with one connection and runs the common
//! statements through the [`QueryBuilder`]. Relation projections requested
//! through [`FindOptions::with`] come back as [`DatabaseValue::Json`] on
//! every backend.

use super::database::Database;
use super::error::{DatabaseError, Result};
use super::query_builder::{OrderDirection, Predicate, QueryBuilder};
use super::schema::{Schema, Table};
use super::value::{DatabaseResult, DatabaseRow, DatabaseValue};

/// Options for `get` and `find`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    relations: Vec<String>,
    order_by: Vec<(String, OrderDirection)>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl FindOptions {
    /// No relations, no ordering, no limit
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the named relation
    #[must_use]
    pub fn with(mut self, relation: impl Into<String>) -> Self {
        self.relations.push(relation.into());
        self
    }

    /// Sort by a column
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by.push((column.into(), direction));
        self
    }

    /// Cap the number of rows
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip rows
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Relations to load
    pub fn relations(&self) -> &[String] {
        &self.relations
    }
}

/// CRUD operations for one table
///
/// ```rust,no_run
/// use gird_orm::core::model::{FindOptions, Model};
/// use gird_orm::core::schema::Schema;
/// use gird_orm::prelude::*;
///
/// # async fn example(db: &SqliteDatabase, schema: &Schema) -> Result<()> {
/// let users = schema.get("users").ok_or_else(|| DatabaseError::TableNotFound("users".into()))?;
/// let model = Model::new(db, users).schema(schema);
///
/// let alice = model.create([("name", "Alice")]).await?;
/// let with_posts = model
///     .get(alice["id"].clone(), &FindOptions::new().with("posts"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Model<'a, D: Database> {
    db: &'a D,
    table: &'a Table,
    schema: Option<&'a Schema>,
}

impl<'a, D: Database> Model<'a, D> {
    /// Bind `table` to `db`
    pub fn new(db: &'a D, table: &'a Table) -> Self {
        Self {
            db,
            table,
            schema: None,
        }
    }

    /// Attach the registry used to resolve relation targets
    #[must_use]
    pub fn schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Bound table
    pub fn table(&self) -> &'a Table {
        self.table
    }

    /// Fresh builder for the bound table
    pub fn query(&self) -> QueryBuilder<'a> {
        let builder = QueryBuilder::for_database(self.table, self.db);
        match self.schema {
            Some(schema) => builder.schema(schema),
            None => builder,
        }
    }

    fn key(&self) -> &'a str {
        self.table.primary_key().unwrap_or("id")
    }

    fn apply(&self, mut builder: QueryBuilder<'a>, options: &FindOptions) -> Result<QueryBuilder<'a>> {
        for relation in &options.relations {
            builder = builder.with(relation)?;
        }
        for (column, direction) in &options.order_by {
            builder = builder.order_by(column, *direction);
        }
        if let Some(limit) = options.limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = options.offset {
            builder = builder.offset(offset);
        }
        Ok(builder)
    }

    /// Insert a row and return it as stored
    pub async fn create<K, V, I>(&self, record: I) -> Result<DatabaseRow>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DatabaseValue>,
    {
        let statement = self.query().insert(record).to_sql()?;
        let rows = self.db.fetch(&statement).await?;
        rows.into_iter().next().ok_or_else(|| {
            DatabaseError::query(format!("INSERT into {} returned no row", self.table.name()))
        })
    }

    /// Fetch one row by primary key
    pub async fn get(
        &self,
        id: impl Into<DatabaseValue>,
        options: &FindOptions,
    ) -> Result<Option<DatabaseRow>> {
        let builder = self.query().where_eq(self.key(), id);
        let statement = self.apply(builder, options)?.to_sql()?;
        let rows = self.db.fetch(&statement).await?;
        Ok(self.decode(rows, options).into_iter().next())
    }

    /// Fetch every row matching `conditions`
    pub async fn find<K, P, I>(&self, conditions: I, options: &FindOptions) -> Result<DatabaseResult>
    where
        I: IntoIterator<Item = (K, P)>,
        K: AsRef<str>,
        P: Into<Predicate>,
    {
        let builder = self.query().where_all(conditions);
        let statement = self.apply(builder, options)?.to_sql()?;
        let rows = self.db.fetch(&statement).await?;
        Ok(self.decode(rows, options))
    }

    /// Fetch every row matching a JSON condition object
    pub async fn find_json(
        &self,
        conditions: &serde_json::Value,
        options: &FindOptions,
    ) -> Result<DatabaseResult> {
        let builder = self.query().where_json(conditions)?;
        let statement = self.apply(builder, options)?.to_sql()?;
        let rows = self.db.fetch(&statement).await?;
        Ok(self.decode(rows, options))
    }

    /// Fetch every row
    pub async fn all(&self) -> Result<DatabaseResult> {
        let statement = self.query().to_sql()?;
        self.db.fetch(&statement).await
    }

    /// Update the row with primary key `id`; returns the updated rows
    pub async fn update<K, V, I>(&self, id: impl Into<DatabaseValue>, record: I) -> Result<DatabaseResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DatabaseValue>,
    {
        let statement = self
            .query()
            .update(record)
            .where_eq(self.key(), id)
            .to_sql()?;
        self.db.fetch(&statement).await
    }

    /// Delete the row with primary key `id`; returns the affected count
    pub async fn delete(&self, id: impl Into<DatabaseValue>) -> Result<u64> {
        let statement = self.query().delete().where_eq(self.key(), id).to_sql()?;
        self.db.run(&statement).await
    }

    /// Parse relation projections that arrive as JSON text
    fn decode(&self, mut rows: DatabaseResult, options: &FindOptions) -> DatabaseResult {
        if options.relations.is_empty() {
            return rows;
        }

        for row in &mut rows {
            for relation in &options.relations {
                let Some(value) = row.get_mut(relation) else {
                    continue;
                };
                if let DatabaseValue::String(text) = value {
                    match serde_json::from_str(text) {
                        Ok(json) => *value = DatabaseValue::Json(json),
                        Err(e) => tracing::warn!(
                            table = self.table.name(),
                            relation = relation.as_str(),
                            error = %e,
                            "relation projection is not valid JSON"
                        ),
                    }
                }
            }
        }
        rows
    }
}
