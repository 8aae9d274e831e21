use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Controls what the schema reader looks at and whether it memoizes its result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOptions {
    pub ignored_tables: BTreeSet<String>,
    /// Table name to the column names dropped from that table's definition.
    pub ignored_columns: BTreeMap<String, BTreeSet<String>>,
    pub enable_caching: bool,
}

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignore_table(mut self, table: impl Into<String>) -> Self {
        self.ignored_tables.insert(table.into());
        self
    }

    pub fn ignore_column(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.ignored_columns
            .entry(table.into())
            .or_default()
            .insert(column.into());
        self
    }

    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.enable_caching = enabled;
        self
    }

    pub fn is_table_ignored(&self, table: &str) -> bool {
        self.ignored_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }

    pub fn is_column_ignored(&self, table: &str, column: &str) -> bool {
        self.ignored_columns
            .iter()
            .filter(|(t, _)| t.eq_ignore_ascii_case(table))
            .any(|(_, columns)| columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }
}
