use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use log::debug;
use regex::Regex;

use crate::models::{
    migration::ValidationResult,
    schema::{SchemaDefinition, TableDefinition},
};

/// Prefix SQLite keeps for its own catalog objects.
pub const RESERVED_PREFIX: &str = "sqlite_";

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

/// A type name of one or more words, optionally followed by `(n)` or `(p, s)`.
static TYPE_TOKEN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z0-9]*(?: [A-Z][A-Z0-9]*)*)\s*(?:\(\s*\d+\s*(?:,\s*\d+\s*)?\))?$").ok()
});

/// Storage classes plus the affinity spellings SQLite documents.
const KNOWN_TYPES: &[&str] = &[
    "INTEGER",
    "INT",
    "TINYINT",
    "SMALLINT",
    "MEDIUMINT",
    "BIGINT",
    "UNSIGNED BIG INT",
    "INT2",
    "INT8",
    "TEXT",
    "CHARACTER",
    "VARCHAR",
    "VARYING CHARACTER",
    "NCHAR",
    "NATIVE CHARACTER",
    "NVARCHAR",
    "CLOB",
    "BLOB",
    "REAL",
    "DOUBLE",
    "DOUBLE PRECISION",
    "FLOAT",
    "NUMERIC",
    "DECIMAL",
    "BOOLEAN",
    "DATE",
    "DATETIME",
    "ANY",
];

pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.as_ref().is_some_and(|re| re.is_match(name))
}

pub fn has_reserved_prefix(name: &str) -> bool {
    name.get(..RESERVED_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(RESERVED_PREFIX))
}

pub fn is_known_type(column_type: &str) -> bool {
    let normalized = column_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();

    TYPE_TOKEN
        .as_ref()
        .and_then(|re| re.captures(&normalized))
        .and_then(|caps| caps.get(1))
        .is_some_and(|base| KNOWN_TYPES.contains(&base.as_str()))
}

/// Checks a schema for naming, typing and referential consistency.
///
/// Every rule runs; violations are collected rather than short-circuited.
#[derive(Debug, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, schema: &SchemaDefinition) -> ValidationResult {
        let mut result = ValidationResult::default();
        let mut index_owners: HashMap<String, &str> = HashMap::new();

        for table in schema.tables() {
            check_table_name(table, &mut result);
            check_columns(table, &mut result);
            check_indexes(table, &mut index_owners, &mut result);
            check_foreign_keys(schema, table, &mut result);

            if !table.has_primary_key() {
                result
                    .warnings
                    .push(format!("table '{}' has no primary key column", table.name));
            }
        }

        for cycle in foreign_key_cycles(schema) {
            result.errors.push(format!(
                "circular foreign key reference between tables: {}",
                cycle.join(" -> ")
            ));
        }

        debug!(
            "Validated {} tables: {} errors, {} warnings",
            schema.len(),
            result.errors.len(),
            result.warnings.len()
        );
        result
    }
}

fn check_table_name(table: &TableDefinition, result: &mut ValidationResult) {
    if !is_valid_identifier(&table.name) {
        result.errors.push(format!(
            "invalid table name '{}': must start with a letter or underscore and contain only letters, digits and underscores",
            table.name
        ));
    }
    if has_reserved_prefix(&table.name) {
        result.errors.push(format!(
            "table name '{}' uses the reserved prefix '{}'",
            table.name, RESERVED_PREFIX
        ));
    }
}

fn check_columns(table: &TableDefinition, result: &mut ValidationResult) {
    let mut seen = HashSet::new();

    for column in &table.columns {
        if !is_valid_identifier(&column.name) {
            result.errors.push(format!(
                "invalid column name '{}' in table '{}': must start with a letter or underscore and contain only letters, digits and underscores",
                column.name, table.name
            ));
        }
        if !is_known_type(&column.column_type) {
            result.errors.push(format!(
                "column '{}.{}' has unrecognized type '{}'",
                table.name, column.name, column.column_type
            ));
        }
        if !seen.insert(column.name.to_ascii_lowercase()) {
            result.errors.push(format!(
                "table '{}' has duplicate column name '{}'",
                table.name, column.name
            ));
        }
    }
}

fn check_indexes<'a>(
    table: &'a TableDefinition,
    index_owners: &mut HashMap<String, &'a str>,
    result: &mut ValidationResult,
) {
    for index in &table.indexes {
        if !is_valid_identifier(&index.name) {
            result.errors.push(format!(
                "invalid index name '{}' on table '{}'",
                index.name, table.name
            ));
        }
        if has_reserved_prefix(&index.name) {
            result.errors.push(format!(
                "index name '{}' uses the reserved prefix '{}'",
                index.name, RESERVED_PREFIX
            ));
        }

        if let Some(owner) = index_owners.insert(index.name.to_ascii_lowercase(), &table.name) {
            result.errors.push(format!(
                "duplicate index name '{}' (declared on '{}' and '{}')",
                index.name, owner, table.name
            ));
        }

        if index.columns.is_empty() {
            result
                .errors
                .push(format!("index '{}' has no columns", index.name));
        }
        for column in &index.columns {
            if table.column(column).is_none() {
                result.errors.push(format!(
                    "index '{}' references column '{}' which does not exist in table '{}'",
                    index.name, column, table.name
                ));
            }
        }
    }
}

fn check_foreign_keys(
    schema: &SchemaDefinition,
    table: &TableDefinition,
    result: &mut ValidationResult,
) {
    for fk in &table.foreign_keys {
        if table.column(&fk.column_name).is_none() {
            result.errors.push(format!(
                "foreign key column '{}' does not exist in table '{}'",
                fk.column_name, table.name
            ));
        }

        match schema.find_table(&fk.referenced_table) {
            None => result.errors.push(format!(
                "foreign key '{}.{}' references table '{}' which does not exist",
                table.name, fk.column_name, fk.referenced_table
            )),
            Some(target) => {
                if target.column(&fk.referenced_column).is_none()
                    && !fk.referenced_column.eq_ignore_ascii_case("rowid")
                {
                    result.errors.push(format!(
                        "foreign key '{}.{}' references column '{}.{}' which does not exist",
                        table.name, fk.column_name, target.name, fk.referenced_column
                    ));
                }
            }
        }
    }
}

/// Finds reference cycles spanning two or more distinct tables.
///
/// Self-references are legal (parent/child rows in one table) and are not edges.
/// Each cycle is reported once, starting from the table declared first.
fn foreign_key_cycles(schema: &SchemaDefinition) -> Vec<Vec<String>> {
    let names: Vec<&str> = schema.table_names().collect();
    let position: HashMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_ascii_lowercase(), i))
        .collect();

    let edges: Vec<Vec<usize>> = schema
        .tables()
        .enumerate()
        .map(|(from, table)| {
            let mut targets: Vec<usize> = table
                .foreign_keys
                .iter()
                .filter_map(|fk| position.get(&fk.referenced_table.to_ascii_lowercase()))
                .copied()
                .filter(|&to| to != from)
                .collect();
            targets.dedup();
            targets
        })
        .collect();

    let mut state = vec![Visit::Unvisited; names.len()];
    let mut stack = Vec::new();
    let mut seen = HashSet::new();
    let mut cycles = Vec::new();

    for start in 0..names.len() {
        if state[start] == Visit::Unvisited {
            walk(start, &edges, &mut state, &mut stack, &mut |cycle: &[usize]| {
                let mut key = cycle.to_vec();
                key.sort_unstable();
                if seen.insert(key) {
                    let mut path: Vec<String> =
                        cycle.iter().map(|&i| names[i].to_string()).collect();
                    path.push(names[cycle[0]].to_string());
                    cycles.push(path);
                }
            });
        }
    }

    cycles
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

fn walk(
    node: usize,
    edges: &[Vec<usize>],
    state: &mut [Visit],
    stack: &mut Vec<usize>,
    on_cycle: &mut dyn FnMut(&[usize]),
) {
    state[node] = Visit::OnStack;
    stack.push(node);

    for &next in &edges[node] {
        match state[next] {
            Visit::Unvisited => walk(next, edges, state, stack, on_cycle),
            Visit::OnStack => {
                if let Some(start) = stack.iter().position(|&n| n == next) {
                    on_cycle(&stack[start..]);
                }
            }
            Visit::Done => {}
        }
    }

    stack.pop();
    state[node] = Visit::Done;
}
