use log::debug;

use crate::models::{
    migration::{MigrationOperation, SchemaDiff},
    schema::{SchemaDefinition, TableDefinition},
};

/// Computes the additive changes that bring `current` up to `expected`.
///
/// Nothing is ever dropped, narrowed or retyped. Differences of that kind only
/// show up as warnings. Operations come out grouped: every `CreateTable` first,
/// then every `AddColumn`, then every `CreateIndex`, each group in the expected
/// schema's table order. Indexes of tables created by this diff are emitted as
/// `CreateIndex` operations too.
#[derive(Debug, Default)]
pub struct SchemaComparer;

impl SchemaComparer {
    pub fn new() -> Self {
        Self
    }

    pub fn compare(&self, current: &SchemaDefinition, expected: &SchemaDefinition) -> SchemaDiff {
        let mut diff = SchemaDiff::default();

        for table in expected.tables() {
            if !current.contains_table(&table.name) {
                diff.operations.push(MigrationOperation::create_table(
                    &table.name,
                    table.create_table_sql(),
                ));
            }
        }

        for table in expected.tables() {
            if let Some(existing) = current.find_table(&table.name) {
                add_missing_columns(existing, table, &mut diff);
            }
        }

        for table in expected.tables() {
            let existing = current.find_table(&table.name);
            add_missing_indexes(existing, table, &mut diff);
        }

        for table in current.tables() {
            if !expected.contains_table(&table.name) {
                diff.warnings.push(format!(
                    "table '{}' exists in the database but not in the expected schema; it will not be dropped",
                    table.name
                ));
            }
        }

        debug!(
            "Compared schemas: {} operations, {} warnings",
            diff.operations.len(),
            diff.warnings.len()
        );
        diff
    }
}

fn add_missing_columns(current: &TableDefinition, expected: &TableDefinition, diff: &mut SchemaDiff) {
    for column in &expected.columns {
        match current.column(&column.name) {
            None => {
                if column.is_primary_key {
                    diff.warnings.push(format!(
                        "column '{}.{}' is part of the primary key but SQLite cannot add key columns to an existing table",
                        expected.name, column.name
                    ));
                }
                if !column.is_nullable && column.default_value.is_none() {
                    diff.warnings.push(format!(
                        "column '{}.{}' is NOT NULL without a default; SQLite will reject adding it to an existing table",
                        expected.name, column.name
                    ));
                }
                diff.operations.push(MigrationOperation::add_column(
                    &current.name,
                    &column.name,
                    column.add_column_sql(&current.name),
                ));
            }
            Some(existing) => {
                if !same_type(&existing.column_type, &column.column_type) {
                    diff.warnings.push(format!(
                        "column '{}.{}' has type '{}' in the database but '{}' is expected; type changes are not applied automatically",
                        expected.name, column.name, existing.column_type, column.column_type
                    ));
                }
            }
        }
    }

    for column in &current.columns {
        if expected.column(&column.name).is_none() {
            diff.warnings.push(format!(
                "column '{}.{}' exists in the database but not in the expected schema; it will not be dropped",
                current.name, column.name
            ));
        }
    }
}

fn add_missing_indexes(
    current: Option<&TableDefinition>,
    expected: &TableDefinition,
    diff: &mut SchemaDiff,
) {
    for index in &expected.indexes {
        match current.and_then(|t| t.index(&index.name)) {
            None => diff.operations.push(MigrationOperation::create_index(
                &expected.name,
                &index.name,
                index.create_index_sql(),
            )),
            Some(existing) => {
                if !existing.same_shape(index) {
                    diff.warnings.push(format!(
                        "index '{}' on '{}' differs from the expected definition; it will not be rebuilt",
                        index.name, expected.name
                    ));
                }
            }
        }
    }
}

fn same_type(current: &str, expected: &str) -> bool {
    normalize_type(current).eq_ignore_ascii_case(&normalize_type(expected))
}

/// Collapses runs of whitespace and drops spaces around the argument list,
/// so `VARCHAR (255)` and `decimal( 10 ,2 )` compare like `VARCHAR(255)` and `DECIMAL(10,2)`.
fn normalize_type(column_type: &str) -> String {
    column_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(" (", "(")
        .replace("( ", "(")
        .replace(" ,", ",")
        .replace(", ", ",")
        .replace(" )", ")")
}
