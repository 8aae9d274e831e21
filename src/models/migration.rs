use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    CreateTable,
    AddColumn,
    CreateIndex,
}

/// One DDL statement the migrator will run verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationOperation {
    pub operation_type: OperationType,
    pub table_name: String,
    pub column_name: Option<String>,
    pub index_name: Option<String>,
    pub sql: String,
}

impl MigrationOperation {
    pub fn create_table(table_name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            operation_type: OperationType::CreateTable,
            table_name: table_name.into(),
            column_name: None,
            index_name: None,
            sql: sql.into(),
        }
    }

    pub fn add_column(
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            operation_type: OperationType::AddColumn,
            table_name: table_name.into(),
            column_name: Some(column_name.into()),
            index_name: None,
            sql: sql.into(),
        }
    }

    pub fn create_index(
        table_name: impl Into<String>,
        index_name: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            operation_type: OperationType::CreateIndex,
            table_name: table_name.into(),
            column_name: None,
            index_name: Some(index_name.into()),
            sql: sql.into(),
        }
    }
}

/// Ordered additive operations plus advisory warnings about drift that is not applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub operations: Vec<MigrationOperation>,
    pub warnings: Vec<String>,
}

impl SchemaDiff {
    pub fn has_changes(&self) -> bool {
        !self.operations.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationContext {
    pub is_dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,
    /// Every statement attempted, in order, including in dry runs.
    pub sql_executed: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
