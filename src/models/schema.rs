use std::{fs, path::Path};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::DbError;

/// Referential action used when a foreign key does not name one.
pub const DEFAULT_FK_ACTION: &str = "NO ACTION";

/// Quotes an identifier for SQLite, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Normalizes a referential action (`cascade`, ` set  null `) to its canonical upper-case form.
pub fn normalize_action(action: &str) -> String {
    let normalized = action
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();
    if normalized.is_empty() {
        DEFAULT_FK_ACTION.to_string()
    } else {
        normalized
    }
}

/// Structure of a whole database, either observed or desired.
///
/// Tables keep their insertion order; iteration order drives the order of
/// generated migration operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<TableDefinition>", into = "Vec<TableDefinition>")]
pub struct SchemaDefinition {
    tables: IndexMap<String, TableDefinition>,
}

impl SchemaDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table, replacing any previous table of the same name in place.
    pub fn with_table(mut self, table: TableDefinition) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDefinition> {
        self.tables.values()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables.get(name)
    }

    /// Looks a table up the way SQLite resolves identifiers, ignoring ASCII case.
    pub fn find_table(&self, name: &str) -> Option<&TableDefinition> {
        self.tables
            .get(name)
            .or_else(|| self.tables().find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.find_table(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn from_json_str(json: &str) -> Result<Self, DbError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

impl From<Vec<TableDefinition>> for SchemaDefinition {
    fn from(tables: Vec<TableDefinition>) -> Self {
        tables
            .into_iter()
            .map(TableDefinition::normalized)
            .fold(Self::new(), Self::with_table)
    }
}

impl From<SchemaDefinition> for Vec<TableDefinition> {
    fn from(schema: SchemaDefinition) -> Self {
        schema.tables.into_values().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDefinition>,
    /// Verbatim DDL used when the table has to be created from scratch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_sql: Option<String>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            create_sql: None,
        }
    }

    /// Appends a column; its position is the next free declaration slot.
    pub fn with_column(mut self, mut column: ColumnDefinition) -> Self {
        column.position = self.columns.len();
        self.columns.push(column);
        self
    }

    /// Appends an index owned by this table.
    pub fn with_index(mut self, mut index: IndexDefinition) -> Self {
        index.table_name = self.name.clone();
        self.indexes.push(index);
        self
    }

    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyDefinition) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    pub fn with_create_sql(mut self, sql: impl Into<String>) -> Self {
        self.create_sql = Some(sql.into());
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| c.is_primary_key)
    }

    pub fn has_primary_key(&self) -> bool {
        self.primary_key_columns().next().is_some()
    }

    /// The declared `create_sql`, or a `CREATE TABLE` statement derived from the definition.
    pub fn create_table_sql(&self) -> String {
        if let Some(sql) = &self.create_sql {
            return sql.clone();
        }

        let mut parts: Vec<String> = self.columns.iter().map(|c| c.definition_sql()).collect();

        let pk: Vec<String> = self
            .primary_key_columns()
            .map(|c| quote_ident(&c.name))
            .collect();
        if !pk.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        }

        for fk in &self.foreign_keys {
            parts.push(fk.constraint_sql());
        }

        format!("CREATE TABLE {} ({})", quote_ident(&self.name), parts.join(", "))
    }

    /// Renumbers column positions and points every index at this table.
    fn normalized(mut self) -> Self {
        for (position, column) in self.columns.iter_mut().enumerate() {
            column.position = position;
        }
        for index in &mut self.indexes {
            index.table_name = self.name.clone();
        }
        self
    }
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Declared storage-class token, e.g. `INTEGER` or `VARCHAR(64)`.
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,
    /// Zero-based declaration order within the table.
    #[serde(default)]
    pub position: usize,
    /// Engine-native literal, e.g. `0`, `'pending'` or `CURRENT_TIMESTAMP`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// A nullable, non-key column.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            is_primary_key: false,
            is_nullable: true,
            position: 0,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Column clause as it appears inside `CREATE TABLE` or after `ADD COLUMN`.
    pub fn definition_sql(&self) -> String {
        let mut sql = quote_ident(&self.name);
        if !self.column_type.trim().is_empty() {
            sql.push(' ');
            sql.push_str(self.column_type.trim());
        }
        if !self.is_nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        sql
    }

    pub fn add_column_sql(&self, table_name: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table_name),
            self.definition_sql()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Unique across the whole schema, not just the owning table.
    pub name: String,
    #[serde(default)]
    pub table_name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_sql: Option<String>,
}

impl IndexDefinition {
    pub fn new<I, S>(name: impl Into<String>, table_name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            table_name: table_name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            is_unique: false,
            create_sql: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_create_sql(mut self, sql: impl Into<String>) -> Self {
        self.create_sql = Some(sql.into());
        self
    }

    /// Same index shape: uniqueness and ordered column list, ignoring case.
    pub fn same_shape(&self, other: &IndexDefinition) -> bool {
        self.is_unique == other.is_unique
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    pub fn create_index_sql(&self) -> String {
        if let Some(sql) = &self.create_sql {
            return sql.clone();
        }

        let columns: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.is_unique { "UNIQUE " } else { "" },
            quote_ident(&self.name),
            quote_ident(&self.table_name),
            columns.join(", ")
        )
    }
}

fn default_action() -> String {
    DEFAULT_FK_ACTION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDefinition {
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
    #[serde(default = "default_action")]
    pub on_delete: String,
    #[serde(default = "default_action")]
    pub on_update: String,
}

impl ForeignKeyDefinition {
    pub fn new(
        column_name: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            column_name: column_name.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
            on_delete: default_action(),
            on_update: default_action(),
        }
    }

    pub fn on_delete(mut self, action: &str) -> Self {
        self.on_delete = normalize_action(action);
        self
    }

    pub fn on_update(mut self, action: &str) -> Self {
        self.on_update = normalize_action(action);
        self
    }

    pub fn constraint_sql(&self) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_ident(&self.column_name),
            quote_ident(&self.referenced_table),
            quote_ident(&self.referenced_column),
            normalize_action(&self.on_delete),
            normalize_action(&self.on_update)
        )
    }
}
