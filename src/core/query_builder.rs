//! Relation-aware SQL query builder
//!
//! A [`QueryBuilder`] is bound to one [`Table`] and one dialect. It collects a
//! declarative call chain and compiles it into exactly one [`Statement`]: the
//! SQL text plus the ordered parameter list. Values are always bound as
//! parameters; only identifiers are written into the SQL, double-quoted.
//!
//! Placeholders are allocated when the statement is compiled, not when a
//! condition is added, because INSERT and UPDATE payload values come first.
//!
//! # Example
//!
//! ```rust
//! use gird_orm::core::query_builder::{Filter, Predicate, QueryBuilder};
//! use gird_orm::core::schema::{int, text, Table};
//! use gird_orm::DatabaseType;
//!
//! let users = Table::new("users")
//!     .column("id", int().primary_key())
//!     .column("name", text())
//!     .column("age", int());
//!
//! let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
//!     .where_all([
//!         ("name", Predicate::from("Tunde")),
//!         ("age", Filter::new().gt(18).into()),
//!     ])
//!     .to_sql()
//!     .unwrap();
//!
//! assert_eq!(
//!     stmt.sql,
//!     "SELECT \"users\".* FROM \"users\" WHERE \"users\".\"name\" = $1 AND \"users\".\"age\" > $2"
//! );
//! assert_eq!(stmt.params.len(), 2);
//! ```

use super::database::Database;
use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use super::schema::{quote_ident, Relation, RelationKind, Schema, Table};
use super::value::{DatabaseValue, Record};
use std::str::FromStr;

/// Comparison operators available in filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to (=)
    Eq,
    /// Greater than (>)
    Gt,
    /// Less than (<)
    Lt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than or equal (<=)
    Lte,
    /// LIKE pattern matching
    Contains,
}

impl Operator {
    fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Contains => "LIKE",
        }
    }
}

impl FromStr for Operator {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gt" => Ok(Operator::Gt),
            "lt" => Ok(Operator::Lt),
            "gte" => Ok(Operator::Gte),
            "lte" => Ok(Operator::Lte),
            "contains" => Ok(Operator::Contains),
            other => Err(DatabaseError::invalid_filter(format!(
                "unknown operator '{}'",
                other
            ))),
        }
    }
}

/// Operator map for one column, e.g. `{ gt: 18, lte: 65 }`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    ops: Vec<(Operator, DatabaseValue)>,
}

impl Filter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column > value comparison
    #[must_use]
    pub fn gt(self, value: impl Into<DatabaseValue>) -> Self {
        self.op(Operator::Gt, value)
    }

    /// Add a column < value comparison
    #[must_use]
    pub fn lt(self, value: impl Into<DatabaseValue>) -> Self {
        self.op(Operator::Lt, value)
    }

    /// Add a column >= value comparison
    #[must_use]
    pub fn gte(self, value: impl Into<DatabaseValue>) -> Self {
        self.op(Operator::Gte, value)
    }

    /// Add a column <= value comparison
    #[must_use]
    pub fn lte(self, value: impl Into<DatabaseValue>) -> Self {
        self.op(Operator::Lte, value)
    }

    /// Add a LIKE comparison; the pattern is bound as given
    #[must_use]
    pub fn contains(self, pattern: impl Into<DatabaseValue>) -> Self {
        self.op(Operator::Contains, pattern)
    }

    /// Add an arbitrary comparison
    #[must_use]
    pub fn op(mut self, operator: Operator, value: impl Into<DatabaseValue>) -> Self {
        self.ops.push((operator, value.into()));
        self
    }
}

/// Right-hand side of one `where_all` entry
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Plain equality
    Eq(DatabaseValue),
    /// One comparison per operator, in order
    Ops(Filter),
}

impl From<Filter> for Predicate {
    fn from(filter: Filter) -> Self {
        Predicate::Ops(filter)
    }
}

macro_rules! predicate_from_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Predicate {
                fn from(value: $ty) -> Self {
                    Predicate::Eq(value.into())
                }
            }
        )*
    };
}

predicate_from_value!(DatabaseValue, bool, i32, i64, f32, f64, String, &str, Vec<u8>);

/// Compiled statement: SQL text plus positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with dialect placeholders
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<DatabaseValue>,
}

/// ORDER BY direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order
    Asc,
    /// Descending order
    Desc,
}

impl OrderDirection {
    fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

/// WHERE condition; the placeholder is assigned at compile time
#[derive(Debug, Clone)]
struct Condition {
    column: String,
    operator: Operator,
}

/// Hands out placeholders in order, starting at index 0
struct Placeholders {
    dialect: DatabaseType,
    next: usize,
}

impl Placeholders {
    fn new(dialect: DatabaseType) -> Self {
        Self { dialect, next: 0 }
    }

    fn next(&mut self) -> String {
        let token = self.dialect.placeholder(self.next);
        self.next += 1;
        token
    }
}

/// Fluent builder producing one statement for one table
#[derive(Debug, Clone)]
pub struct QueryBuilder<'a> {
    table: &'a Table,
    schema: Option<&'a Schema>,
    dialect: DatabaseType,
    operation: Operation,
    columns: Vec<String>,
    projections: Vec<String>,
    conditions: Vec<Condition>,
    params: Vec<DatabaseValue>,
    joins: Vec<String>,
    group_by: Vec<String>,
    belongs_to_keys: Vec<String>,
    relations: Vec<String>,
    order_by: Vec<(String, OrderDirection)>,
    limit: Option<usize>,
    offset: Option<usize>,
    data: Record,
}

impl<'a> QueryBuilder<'a> {
    /// Create a SELECT builder over `table` for `dialect`
    pub fn new(table: &'a Table, dialect: DatabaseType) -> Self {
        Self {
            table,
            schema: None,
            dialect,
            operation: Operation::Select,
            columns: vec![Self::all_columns(table)],
            projections: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            belongs_to_keys: Vec::new(),
            relations: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            data: Record::new(),
        }
    }

    /// Create a builder using the dialect of `db`
    pub fn for_database<D: Database + ?Sized>(table: &'a Table, db: &D) -> Self {
        Self::new(table, db.database_type())
    }

    /// Attach the registry used to resolve relation targets
    #[must_use]
    pub fn schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    fn all_columns(table: &Table) -> String {
        format!("{}.*", quote_ident(table.name()))
    }

    /// Bound table
    pub fn table(&self) -> &'a Table {
        self.table
    }

    /// Select specific columns; none or `*` selects every column of the table
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.operation = Operation::Select;
        self.columns = match columns.first() {
            None | Some(&"*") => vec![Self::all_columns(self.table)],
            Some(_) => columns.iter().map(|c| c.to_string()).collect(),
        };
        self
    }

    /// Qualify a bare column with the bound table; dotted keys are kept as is
    fn qualify(&self, key: &str) -> String {
        if key.contains('.') {
            key.to_string()
        } else {
            format!("{}.{}", quote_ident(self.table.name()), quote_ident(key))
        }
    }

    fn push_condition(&mut self, key: &str, operator: Operator, value: DatabaseValue) {
        let column = self.qualify(key);
        self.conditions.push(Condition { column, operator });
        self.params.push(value);
    }

    /// AND a map of conditions onto the WHERE clause, in iteration order
    #[must_use]
    pub fn where_all<K, P, I>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: AsRef<str>,
        P: Into<Predicate>,
    {
        for (key, predicate) in conditions {
            match predicate.into() {
                Predicate::Eq(value) => self.push_condition(key.as_ref(), Operator::Eq, value),
                Predicate::Ops(filter) => {
                    for (operator, value) in filter.ops {
                        self.push_condition(key.as_ref(), operator, value);
                    }
                }
            }
        }
        self
    }

    /// AND a JSON object of conditions, e.g. `{"age": {"gt": 18}, "name": "Tunde"}`
    ///
    /// Nested objects are operator maps. The whole object is validated before
    /// anything is added, so an error leaves no partial conditions behind.
    pub fn where_json(self, conditions: &serde_json::Value) -> Result<Self> {
        let object = conditions
            .as_object()
            .ok_or_else(|| DatabaseError::invalid_filter("conditions must be a JSON object"))?;

        let mut parsed = Vec::with_capacity(object.len());
        for (key, value) in object {
            let predicate = match value.as_object() {
                Some(ops) => {
                    let mut filter = Filter::new();
                    for (op, operand) in ops {
                        let operator = op.parse::<Operator>().map_err(|_| {
                            DatabaseError::invalid_filter(format!(
                                "unknown operator '{}' for '{}'",
                                op, key
                            ))
                        })?;
                        filter = filter.op(operator, DatabaseValue::from_json(operand));
                    }
                    Predicate::Ops(filter)
                }
                None => Predicate::Eq(DatabaseValue::from_json(value)),
            };
            parsed.push((key.as_str(), predicate));
        }

        Ok(self.where_all(parsed))
    }

    /// Add a WHERE column = value condition
    #[must_use]
    pub fn where_eq(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_condition(column, Operator::Eq, value.into());
        self
    }

    /// Add a WHERE column > value condition
    #[must_use]
    pub fn where_gt(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_condition(column, Operator::Gt, value.into());
        self
    }

    /// Add a WHERE column < value condition
    #[must_use]
    pub fn where_lt(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_condition(column, Operator::Lt, value.into());
        self
    }

    /// Add a WHERE column >= value condition
    #[must_use]
    pub fn where_gte(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_condition(column, Operator::Gte, value.into());
        self
    }

    /// Add a WHERE column <= value condition
    #[must_use]
    pub fn where_lte(mut self, column: &str, value: impl Into<DatabaseValue>) -> Self {
        self.push_condition(column, Operator::Lte, value.into());
        self
    }

    /// Add a WHERE column LIKE pattern condition
    #[must_use]
    pub fn where_like(mut self, column: &str, pattern: impl Into<DatabaseValue>) -> Self {
        self.push_condition(column, Operator::Contains, pattern.into());
        self
    }

    /// Join a declared relation and project it under the relation's name.
    ///
    /// `BelongsTo` adds a nested object, `HasMany` a nested array and groups
    /// by this table's primary key. Fails with
    /// [`DatabaseError::RelationNotFound`] when the table declares no such
    /// relation. Loading the same relation again leaves the builder as is.
    pub fn with(mut self, name: &str) -> Result<Self> {
        let table = self.table;
        let relation = table
            .get_relation(name)
            .ok_or_else(|| DatabaseError::relation_not_found(name, table.name()))?;
        if self.relations.iter().any(|loaded| loaded == name) {
            return Ok(self);
        }

        let projection = self.relation_projection(name, relation)?;

        let this = quote_ident(table.name());
        let target = quote_ident(relation.target_table());
        let foreign_key = quote_ident(relation.foreign_key());
        let key = quote_ident(relation.referenced_key());

        match relation.kind() {
            RelationKind::BelongsTo => {
                self.joins.push(format!(
                    "LEFT JOIN {target} ON {this}.{foreign_key} = {target}.{key}"
                ));
                self.belongs_to_keys.push(format!("{target}.{key}"));
            }
            RelationKind::HasMany => {
                self.joins.push(format!(
                    "LEFT JOIN {target} ON {this}.{key} = {target}.{foreign_key}"
                ));
                let pk = table.primary_key().unwrap_or(relation.referenced_key());
                let group = format!("{this}.{}", quote_ident(pk));
                if !self.group_by.contains(&group) {
                    self.group_by.push(group);
                }
            }
        }

        self.projections.push(projection);
        self.relations.push(name.to_string());
        Ok(self)
    }

    fn relation_projection(&self, alias: &str, relation: &Relation) -> Result<String> {
        let target = quote_ident(relation.target_table());
        let foreign_key = quote_ident(relation.foreign_key());
        let alias = quote_ident(alias);

        match self.dialect {
            DatabaseType::Postgres => Ok(match relation.kind() {
                RelationKind::BelongsTo => format!("to_json({target}.*) AS {alias}"),
                RelationKind::HasMany => format!(
                    "COALESCE(json_agg({target}.*) FILTER (WHERE {target}.{foreign_key} IS NOT NULL), '[]') AS {alias}"
                ),
            }),
            DatabaseType::Sqlite => {
                // json_object needs the target's column list
                let target_table = self
                    .schema
                    .and_then(|schema| schema.get(relation.target_table()))
                    .ok_or_else(|| DatabaseError::TableNotFound(relation.target_table().to_string()))?;

                let fields: Vec<String> = target_table
                    .column_names()
                    .map(|col| format!("'{}', {target}.{}", col.replace('\'', "''"), quote_ident(col)))
                    .collect();
                let object = format!("json_object({})", fields.join(", "));

                Ok(match relation.kind() {
                    RelationKind::BelongsTo => format!(
                        "CASE WHEN {target}.{} IS NULL THEN NULL ELSE {object} END AS {alias}",
                        quote_ident(relation.referenced_key())
                    ),
                    RelationKind::HasMany => format!(
                        "COALESCE(json_group_array({object}) FILTER (WHERE {target}.{foreign_key} IS NOT NULL), '[]') AS {alias}"
                    ),
                })
            }
        }
    }

    /// Turn the builder into an INSERT of `data`
    #[must_use]
    pub fn insert<K, V, I>(mut self, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DatabaseValue>,
    {
        self.operation = Operation::Insert;
        self.data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Turn the builder into an UPDATE setting `data`
    #[must_use]
    pub fn update<K, V, I>(mut self, data: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<DatabaseValue>,
    {
        self.operation = Operation::Update;
        self.data = data.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Turn the builder into a DELETE
    #[must_use]
    pub fn delete(mut self) -> Self {
        self.operation = Operation::Delete;
        self
    }

    /// Add ORDER BY clause
    #[must_use]
    pub fn order_by(mut self, column: &str, direction: OrderDirection) -> Self {
        let column = self.qualify(column);
        self.order_by.push((column, direction));
        self
    }

    /// Add ORDER BY ASC
    #[must_use]
    pub fn order_by_asc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Asc)
    }

    /// Add ORDER BY DESC
    #[must_use]
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, OrderDirection::Desc)
    }

    /// Add LIMIT clause
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add OFFSET clause
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn where_clause(&self, placeholders: &mut Placeholders) -> String {
        if self.conditions.is_empty() {
            return String::new();
        }

        let conditions: Vec<String> = self
            .conditions
            .iter()
            .map(|cond| {
                format!(
                    "{} {} {}",
                    cond.column,
                    cond.operator.as_sql(),
                    placeholders.next()
                )
            })
            .collect();
        format!(" WHERE {}", conditions.join(" AND "))
    }

    /// Compile the chain into one statement
    pub fn to_sql(&self) -> Result<Statement> {
        let table = quote_ident(self.table.name());
        let mut placeholders = Placeholders::new(self.dialect);

        match self.operation {
            Operation::Insert => {
                let sql = if self.data.is_empty() {
                    format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table)
                } else {
                    let columns: Vec<String> = self.data.keys().map(|k| quote_ident(k)).collect();
                    let values: Vec<String> =
                        self.data.keys().map(|_| placeholders.next()).collect();
                    format!(
                        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                        table,
                        columns.join(", "),
                        values.join(", ")
                    )
                };

                Ok(Statement {
                    sql,
                    params: self.data.values().cloned().collect(),
                })
            }
            Operation::Update => {
                if self.data.is_empty() {
                    return Err(DatabaseError::query(format!(
                        "UPDATE on {} requires at least one column",
                        table
                    )));
                }

                let set_clauses: Vec<String> = self
                    .data
                    .keys()
                    .map(|k| format!("{} = {}", quote_ident(k), placeholders.next()))
                    .collect();
                let where_clause = self.where_clause(&mut placeholders);

                let mut params: Vec<DatabaseValue> = self.data.values().cloned().collect();
                params.extend(self.params.iter().cloned());

                Ok(Statement {
                    sql: format!(
                        "UPDATE {} SET {}{} RETURNING *",
                        table,
                        set_clauses.join(", "),
                        where_clause
                    ),
                    params,
                })
            }
            Operation::Delete => Ok(Statement {
                sql: format!(
                    "DELETE FROM {}{}",
                    table,
                    self.where_clause(&mut placeholders)
                ),
                params: self.params.clone(),
            }),
            Operation::Select => {
                let selection: Vec<&str> = self
                    .columns
                    .iter()
                    .chain(self.projections.iter())
                    .map(String::as_str)
                    .collect();
                let mut sql = format!("SELECT {} FROM {}", selection.join(", "), table);

                for join in &self.joins {
                    sql.push(' ');
                    sql.push_str(join);
                }

                sql.push_str(&self.where_clause(&mut placeholders));

                if !self.group_by.is_empty() {
                    let mut group_by = self.group_by.clone();
                    // keep nested objects functionally dependent on the grouping
                    for key in &self.belongs_to_keys {
                        if !group_by.contains(key) {
                            group_by.push(key.clone());
                        }
                    }
                    sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
                }

                if !self.order_by.is_empty() {
                    let order_clauses: Vec<String> = self
                        .order_by
                        .iter()
                        .map(|(col, dir)| format!("{} {}", col, dir.as_sql()))
                        .collect();
                    sql.push_str(&format!(" ORDER BY {}", order_clauses.join(", ")));
                }

                if let Some(limit) = self.limit {
                    sql.push_str(&format!(" LIMIT {}", limit));
                }

                if let Some(offset) = self.offset {
                    sql.push_str(&format!(" OFFSET {}", offset));
                }

                Ok(Statement {
                    sql,
                    params: self.params.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{int, text, Relation};
    use serde_json::json;

    fn users() -> Table {
        Table::new("users")
            .column("id", int().primary_key())
            .column("name", text())
            .column("age", int())
            .relation("posts", Relation::has_many("posts", "author_id"))
    }

    fn posts() -> Table {
        Table::new("posts")
            .column("id", int().primary_key())
            .column("title", text())
            .column("author_id", int().references("users", "id"))
            .relation("author", Relation::belongs_to("users", "author_id"))
    }

    #[test]
    fn test_select_defaults_to_qualified_wildcard() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql, "SELECT \"users\".* FROM \"users\"");
        assert!(stmt.params.is_empty());

        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .select(&["*"])
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql, "SELECT \"users\".* FROM \"users\"");
    }

    #[test]
    fn test_select_columns() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Sqlite)
            .select(&["\"users\".\"name\"", "\"users\".\"age\""])
            .to_sql()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"users\".\"name\", \"users\".\"age\" FROM \"users\""
        );
    }

    #[test]
    fn test_where_equality_one_param_per_key() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .where_all([("name", "Tunde"), ("age", "30")])
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"users\".* FROM \"users\" WHERE \"users\".\"name\" = $1 AND \"users\".\"age\" = $2"
        );
        assert_eq!(
            stmt.params,
            vec![DatabaseValue::from("Tunde"), DatabaseValue::from("30")]
        );
    }

    #[test]
    fn test_where_operators() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .where_all([(
                "age",
                Filter::new().gt(18).lt(65).gte(21).lte(60),
            )])
            .where_all([("name", Filter::new().contains("%un%"))])
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"users\".* FROM \"users\" WHERE \"users\".\"age\" > $1 AND \"users\".\"age\" < $2 \
             AND \"users\".\"age\" >= $3 AND \"users\".\"age\" <= $4 AND \"users\".\"name\" LIKE $5"
        );
        assert_eq!(stmt.params.len(), 5);
        assert!(!stmt.sql.contains("%un%"));
        assert_eq!(stmt.params[4], DatabaseValue::from("%un%"));
    }

    #[test]
    fn test_where_dotted_key_is_verbatim() {
        let posts = posts();
        let stmt = QueryBuilder::new(&posts, DatabaseType::Sqlite)
            .where_eq("users.name", "Ada")
            .to_sql()
            .unwrap();
        assert!(stmt.sql.ends_with("WHERE users.name = ?"));
    }

    #[test]
    fn test_where_json() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .where_json(&json!({ "age": { "gt": 18 }, "name": "Tunde" }))
            .unwrap()
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"users\".* FROM \"users\" WHERE \"users\".\"age\" > $1 AND \"users\".\"name\" = $2"
        );
        assert_eq!(
            stmt.params,
            vec![DatabaseValue::Long(18), DatabaseValue::from("Tunde")]
        );
    }

    #[test]
    fn test_where_json_rejects_unknown_operator() {
        let users = users();
        let err = QueryBuilder::new(&users, DatabaseType::Postgres)
            .where_json(&json!({ "name": "x", "age": { "between": [1, 2] } }))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidFilter(_)));

        let err = QueryBuilder::new(&users, DatabaseType::Postgres)
            .where_json(&json!(["not", "an", "object"]))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidFilter(_)));
    }

    #[test]
    fn test_insert_returning() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .insert([("name", DatabaseValue::from("Alice")), ("age", 30.into())])
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2) RETURNING *"
        );
        assert_eq!(
            stmt.params,
            vec![DatabaseValue::from("Alice"), DatabaseValue::Int(30)]
        );
    }

    #[test]
    fn test_insert_empty_record_uses_default_values() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Sqlite)
            .insert(Record::new())
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql, "INSERT INTO \"users\" DEFAULT VALUES RETURNING *");
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn test_update_numbers_set_before_where() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .where_eq("id", 7)
            .update([("name", DatabaseValue::from("Bob")), ("age", 31.into())])
            .where_all([("age", Filter::new().lt(100))])
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "UPDATE \"users\" SET \"name\" = $1, \"age\" = $2 WHERE \"users\".\"id\" = $3 \
             AND \"users\".\"age\" < $4 RETURNING *"
        );
        assert_eq!(
            stmt.params,
            vec![
                DatabaseValue::from("Bob"),
                DatabaseValue::Int(31),
                DatabaseValue::Int(7),
                DatabaseValue::Int(100),
            ]
        );
    }

    #[test]
    fn test_update_requires_data() {
        let users = users();
        let err = QueryBuilder::new(&users, DatabaseType::Postgres)
            .update(Record::new())
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, DatabaseError::QueryError(_)));
    }

    #[test]
    fn test_delete() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Sqlite)
            .delete()
            .where_eq("id", 42)
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"users\" WHERE \"users\".\"id\" = ?");
        assert_eq!(stmt.params, vec![DatabaseValue::Int(42)]);

        let stmt = QueryBuilder::new(&users, DatabaseType::Sqlite)
            .delete()
            .to_sql()
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"users\"");
    }

    #[test]
    fn test_with_belongs_to_postgres() {
        let posts = posts();
        let stmt = QueryBuilder::new(&posts, DatabaseType::Postgres)
            .with("author")
            .unwrap()
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"posts\".*, to_json(\"users\".*) AS \"author\" FROM \"posts\" \
             LEFT JOIN \"users\" ON \"posts\".\"author_id\" = \"users\".\"id\""
        );
        assert_eq!(stmt.sql.matches("LEFT JOIN").count(), 1);
        assert!(!stmt.sql.contains("GROUP BY"));
    }

    #[test]
    fn test_with_has_many_postgres_groups_by_primary_key() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .with("posts")
            .unwrap()
            .where_eq("id", 1)
            .to_sql()
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT \"users\".*, COALESCE(json_agg(\"posts\".*) FILTER (WHERE \"posts\".\"author_id\" IS NOT NULL), '[]') AS \"posts\" \
             FROM \"users\" LEFT JOIN \"posts\" ON \"users\".\"id\" = \"posts\".\"author_id\" \
             WHERE \"users\".\"id\" = $1 GROUP BY \"users\".\"id\""
        );
    }

    #[test]
    fn test_with_same_relation_twice_joins_once() {
        let schema = Schema::new().table(users()).table(posts());
        let users = schema.get("users").unwrap();

        for dialect in [DatabaseType::Postgres, DatabaseType::Sqlite] {
            let once = QueryBuilder::new(users, dialect)
                .schema(&schema)
                .with("posts")
                .unwrap()
                .to_sql()
                .unwrap();
            let twice = QueryBuilder::new(users, dialect)
                .schema(&schema)
                .with("posts")
                .unwrap()
                .with("posts")
                .unwrap()
                .to_sql()
                .unwrap();

            assert_eq!(twice, once);
            assert_eq!(twice.sql.matches("LEFT JOIN").count(), 1);
            assert_eq!(twice.sql.matches("AS \"posts\"").count(), 1);
        }
    }

    #[test]
    fn test_with_keeps_projection_after_select() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Postgres)
            .with("posts")
            .unwrap()
            .select(&["\"users\".\"name\""])
            .to_sql()
            .unwrap();
        assert!(stmt.sql.starts_with("SELECT \"users\".\"name\", COALESCE(json_agg"));
    }

    #[test]
    fn test_with_unknown_relation() {
        let users = users();
        let builder = QueryBuilder::new(&users, DatabaseType::Postgres).where_eq("id", 1);
        let before = builder.to_sql().unwrap();

        let err = builder.clone().with("comments").unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::RelationNotFound { ref relation, ref table }
                if relation == "comments" && table == "users"
        ));
        assert_eq!(builder.to_sql().unwrap(), before);
    }

    #[test]
    fn test_with_sqlite_needs_target_descriptor() {
        let users = users();
        let err = QueryBuilder::new(&users, DatabaseType::Sqlite)
            .with("posts")
            .unwrap_err();
        assert!(matches!(err, DatabaseError::TableNotFound(ref t) if t == "posts"));
    }

    #[test]
    fn test_with_sqlite_projections() {
        let schema = Schema::new().table(users()).table(posts());
        let users = schema.get("users").unwrap();
        let posts = schema.get("posts").unwrap();

        let stmt = QueryBuilder::new(users, DatabaseType::Sqlite)
            .schema(&schema)
            .with("posts")
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(stmt.sql.contains(
            "COALESCE(json_group_array(json_object('id', \"posts\".\"id\", 'title', \"posts\".\"title\", \
             'author_id', \"posts\".\"author_id\")) FILTER (WHERE \"posts\".\"author_id\" IS NOT NULL), '[]') AS \"posts\""
        ));
        assert!(stmt.sql.ends_with("GROUP BY \"users\".\"id\""));

        let stmt = QueryBuilder::new(posts, DatabaseType::Sqlite)
            .schema(&schema)
            .with("author")
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(stmt.sql.contains(
            "CASE WHEN \"users\".\"id\" IS NULL THEN NULL ELSE json_object('id', \"users\".\"id\", \
             'name', \"users\".\"name\", 'age', \"users\".\"age\") END AS \"author\""
        ));
    }

    #[test]
    fn test_belongs_to_key_grouped_alongside_has_many() {
        let comments = Table::new("comments")
            .column("id", int().primary_key())
            .column("post_id", int().references("posts", "id"))
            .relation("post", Relation::belongs_to("posts", "post_id"))
            .relation("replies", Relation::has_many("replies", "comment_id"));

        let stmt = QueryBuilder::new(&comments, DatabaseType::Postgres)
            .with("post")
            .unwrap()
            .with("replies")
            .unwrap()
            .to_sql()
            .unwrap();
        assert!(stmt
            .sql
            .ends_with("GROUP BY \"comments\".\"id\", \"posts\".\"id\""));
    }

    #[test]
    fn test_order_limit_offset() {
        let users = users();
        let stmt = QueryBuilder::new(&users, DatabaseType::Sqlite)
            .where_gte("age", 18)
            .order_by_desc("age")
            .limit(10)
            .offset(20)
            .to_sql()
            .unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"users\".* FROM \"users\" WHERE \"users\".\"age\" >= ? \
             ORDER BY \"users\".\"age\" DESC LIMIT 10 OFFSET 20"
        );
    }
}
