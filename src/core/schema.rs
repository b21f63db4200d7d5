//! Schema descriptors
//!
//! A [`Table`] declares a table's columns (in DDL order) and its named
//! relations to other tables. A [`Schema`] is the explicit registry of tables
//! handed to the synchronizer and, optionally, to the query builder.
//!
//! # Example
//!
//! ```rust
//! use gird_orm::core::schema::{int, text, Relation, Schema, Table};
//!
//! let users = Table::new("users")
//!     .column("id", int().primary_key())
//!     .column("name", text())
//!     .relation("posts", Relation::has_many("posts", "author_id"));
//!
//! let posts = Table::new("posts")
//!     .column("id", int().primary_key())
//!     .column("title", text())
//!     .column("author_id", int().references("users", "id"))
//!     .relation("author", Relation::belongs_to("users", "author_id"));
//!
//! let schema = Schema::new().table(users).table(posts);
//! assert_eq!(schema.len(), 2);
//! ```

use super::database_types::DatabaseType;
use indexmap::IndexMap;

/// SQL column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInt,
    /// Double precision float
    Real,
    /// Text
    Text,
    /// Boolean
    Boolean,
    /// JSON document
    Json,
    /// Timestamp with time zone
    Timestamp,
}

impl ColumnType {
    /// Type name in the given dialect
    pub fn as_sql(&self, dialect: DatabaseType) -> &'static str {
        match (self, dialect) {
            (ColumnType::Integer, _) => "INTEGER",
            (ColumnType::BigInt, _) => "BIGINT",
            (ColumnType::Real, DatabaseType::Postgres) => "DOUBLE PRECISION",
            (ColumnType::Real, DatabaseType::Sqlite) => "REAL",
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Boolean, _) => "BOOLEAN",
            (ColumnType::Json, DatabaseType::Postgres) => "JSONB",
            (ColumnType::Json, DatabaseType::Sqlite) => "TEXT",
            (ColumnType::Timestamp, DatabaseType::Postgres) => "TIMESTAMPTZ",
            (ColumnType::Timestamp, DatabaseType::Sqlite) => "TEXT",
        }
    }

    fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::BigInt)
    }
}

/// Foreign-key target of a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Referenced table
    pub table: String,
    /// Referenced column
    pub column: String,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    sql_type: ColumnType,
    primary_key: bool,
    foreign_key: Option<ForeignKey>,
}

impl Column {
    /// Create a plain column of the given type
    pub fn new(sql_type: ColumnType) -> Self {
        Self {
            sql_type,
            primary_key: false,
            foreign_key: None,
        }
    }

    /// Mark this column as the primary key
    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark this column as a foreign key to `table(column)`
    #[must_use]
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.foreign_key = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }

    /// Column type
    pub fn sql_type(&self) -> ColumnType {
        self.sql_type
    }

    /// Whether this column is the primary key
    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Foreign-key target, if any
    pub fn foreign_key(&self) -> Option<&ForeignKey> {
        self.foreign_key.as_ref()
    }

    /// Column definition as used inside `CREATE TABLE`
    fn definition(&self, name: &str, dialect: DatabaseType) -> String {
        if self.primary_key && self.sql_type.is_integer() {
            return format!(
                "{} {}",
                quote_ident(name),
                dialect.identity_column(self.sql_type == ColumnType::BigInt)
            );
        }

        let mut def = format!("{} {}", quote_ident(name), self.sql_type.as_sql(dialect));
        if self.primary_key {
            def.push_str(" PRIMARY KEY");
        }
        def
    }
}

/// Integer column
pub fn int() -> Column {
    Column::new(ColumnType::Integer)
}

/// 64-bit integer column
pub fn big_int() -> Column {
    Column::new(ColumnType::BigInt)
}

/// Floating point column
pub fn real() -> Column {
    Column::new(ColumnType::Real)
}

/// Text column
pub fn text() -> Column {
    Column::new(ColumnType::Text)
}

/// Boolean column
pub fn bool() -> Column {
    Column::new(ColumnType::Boolean)
}

/// JSON column
pub fn json() -> Column {
    Column::new(ColumnType::Json)
}

/// Timestamp column
pub fn timestamp() -> Column {
    Column::new(ColumnType::Timestamp)
}

/// Relation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This table holds the foreign key (post -> author)
    BelongsTo,
    /// The target table holds the foreign key (user -> posts)
    HasMany,
}

/// Named relation from one table to another
///
/// `foreign_key` is always the referencing column and `local_key` the
/// referenced one. For `BelongsTo` the foreign key lives on the declaring
/// table; for `HasMany` it lives on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    kind: RelationKind,
    target_table: String,
    foreign_key: String,
    local_key: String,
}

impl Relation {
    /// `foreign_key` on this table points at the target's `id`
    pub fn belongs_to(target_table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::BelongsTo,
            target_table: target_table.into(),
            foreign_key: foreign_key.into(),
            local_key: "id".to_string(),
        }
    }

    /// `foreign_key` on the target table points at this table's `id`
    pub fn has_many(target_table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            kind: RelationKind::HasMany,
            target_table: target_table.into(),
            foreign_key: foreign_key.into(),
            local_key: "id".to_string(),
        }
    }

    /// Override the referenced key (defaults to `id`)
    #[must_use]
    pub fn local_key(mut self, key: impl Into<String>) -> Self {
        self.local_key = key.into();
        self
    }

    /// Relation kind
    pub fn kind(&self) -> RelationKind {
        self.kind
    }

    /// Target table name
    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    /// Referencing column
    pub fn foreign_key(&self) -> &str {
        &self.foreign_key
    }

    /// Referenced column
    pub fn referenced_key(&self) -> &str {
        &self.local_key
    }
}

/// Schema descriptor for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    name: String,
    columns: IndexMap<String, Column>,
    relations: IndexMap<String, Relation>,
}

impl Table {
    /// Create an empty table descriptor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            relations: IndexMap::new(),
        }
    }

    /// Add a column; columns keep declaration order
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column: Column) -> Self {
        self.columns.insert(name.into(), column);
        self
    }

    /// Declare a named relation
    #[must_use]
    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, col)| (name.as_str(), col))
    }

    /// Column names in declaration order
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Look up a column by name
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Look up a relation by name
    pub fn get_relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// Declared relation names
    pub fn relation_names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    /// Name of the first column marked as primary key
    pub fn primary_key(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, col)| col.is_primary_key())
            .map(|(name, _)| name.as_str())
    }

    /// Tables referenced by this table's foreign keys
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.columns
            .values()
            .filter_map(|col| col.foreign_key())
            .map(|fk| fk.table.as_str())
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this descriptor
    ///
    /// Foreign keys are emitted as table constraints after all columns.
    pub fn create_table_sql(&self, dialect: DatabaseType) -> String {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|(name, col)| col.definition(name, dialect))
            .collect();

        defs.extend(self.columns.iter().filter_map(|(name, col)| {
            col.foreign_key().map(|fk| {
                format!(
                    "FOREIGN KEY ({}) REFERENCES {}({})",
                    quote_ident(name),
                    quote_ident(&fk.table),
                    quote_ident(&fk.column)
                )
            })
        }));

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            defs.join(", ")
        )
    }

    /// `ALTER TABLE ... ADD COLUMN` for one declared column
    ///
    /// Never adds `PRIMARY KEY`; a foreign key becomes an inline `REFERENCES`.
    pub fn add_column_sql(&self, name: &str, dialect: DatabaseType) -> Option<String> {
        let col = self.columns.get(name)?;
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(&self.name),
            quote_ident(name),
            col.sql_type().as_sql(dialect)
        );
        if let Some(fk) = col.foreign_key() {
            sql.push_str(&format!(
                " REFERENCES {}({})",
                quote_ident(&fk.table),
                quote_ident(&fk.column)
            ));
        }
        Some(sql)
    }
}

/// Explicit registry of table descriptors
///
/// Registration order is the order the synchronizer first tries tables in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: IndexMap<String, Table>,
}

impl Schema {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, builder style
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.register(table);
        self
    }

    /// Register a table, replacing any previous descriptor of the same name
    pub fn register(&mut self, table: Table) -> Option<Table> {
        let previous = self.tables.insert(table.name.clone(), table);
        if let Some(prev) = &previous {
            tracing::warn!(table = %prev.name, "replacing previously registered table");
        }
        previous
    }

    /// Look up a table by name
    pub fn get(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Tables in registration order
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Number of registered tables
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether no table is registered
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Double-quote an identifier, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
