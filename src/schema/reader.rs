use std::{collections::HashMap, sync::Arc};

use log::{debug, info};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    db::DbClient,
    errors::DbError,
    models::{
        options::SchemaOptions,
        schema::{
            ColumnDefinition, ForeignKeyDefinition, IndexDefinition, SchemaDefinition,
            TableDefinition,
        },
    },
};

const TABLES_QUERY: &str = "SELECT name, sql FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'";

const INDEX_SQL_QUERY: &str = "SELECT name, sql FROM sqlite_master WHERE type = 'index'";

/// Introspects a live SQLite database into a [`SchemaDefinition`].
pub struct SchemaReader {
    options: SchemaOptions,
    cache: Mutex<Option<Arc<SchemaDefinition>>>,
}

impl SchemaReader {
    pub fn new(options: SchemaOptions) -> Self {
        Self {
            options,
            cache: Mutex::new(None),
        }
    }

    /// Reads the current schema.
    ///
    /// With caching enabled the first successful read is kept for the lifetime of
    /// the reader and every later call returns that same snapshot, even if the
    /// database has changed since. Failed reads are never cached.
    pub async fn read_schema(&self, client: &dyn DbClient) -> Result<Arc<SchemaDefinition>, DbError> {
        if !self.options.enable_caching {
            return self.read_live(client).await.map(Arc::new);
        }

        let mut cache = self.cache.lock().await;
        if let Some(schema) = cache.as_ref() {
            debug!("Returning cached schema ({} tables)", schema.len());
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(self.read_live(client).await?);
        *cache = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Drops a memoized snapshot so the next read sees live state.
    pub async fn invalidate_cache(&self) {
        self.cache.lock().await.take();
    }

    async fn read_live(&self, client: &dyn DbClient) -> Result<SchemaDefinition, DbError> {
        let index_sql: HashMap<String, Option<String>> = client
            .query(INDEX_SQL_QUERY)
            .await?
            .iter()
            .filter_map(|row| Some((text(row, "name")?, text(row, "sql"))))
            .collect();

        let mut schema = SchemaDefinition::new();
        for row in client.query(TABLES_QUERY).await? {
            let name = required_text(&row, "name", "sqlite_master")?;
            if self.options.is_table_ignored(&name) {
                debug!("Skipping ignored table {}", name);
                continue;
            }

            let table = self
                .read_table(client, &name, text(&row, "sql"), &index_sql)
                .await?;
            debug!(
                "Read table {} ({} columns, {} indexes, {} foreign keys)",
                table.name,
                table.columns.len(),
                table.indexes.len(),
                table.foreign_keys.len()
            );
            schema = schema.with_table(table);
        }

        info!("Read schema with {} tables", schema.len());
        Ok(schema)
    }

    async fn read_table(
        &self,
        client: &dyn DbClient,
        name: &str,
        create_sql: Option<String>,
        index_sql: &HashMap<String, Option<String>>,
    ) -> Result<TableDefinition, DbError> {
        let mut table = TableDefinition::new(name);
        table.create_sql = create_sql;

        for column in self.read_columns(client, name).await? {
            table = table.with_column(column);
        }

        for mut index in read_indexes(client, name).await? {
            index.create_sql = index_sql.get(&index.name).cloned().flatten();
            table = table.with_index(index);
        }

        for fk in read_foreign_keys(client, name).await? {
            if self.options.is_column_ignored(name, &fk.column_name) {
                continue;
            }
            table = table.with_foreign_key(fk);
        }

        Ok(table)
    }

    async fn read_columns(
        &self,
        client: &dyn DbClient,
        table: &str,
    ) -> Result<Vec<ColumnDefinition>, DbError> {
        let query = format!(
            "SELECT cid, name, type, \"notnull\", dflt_value, pk \
             FROM pragma_table_info({}) ORDER BY cid",
            sql_literal(table)
        );

        let mut columns = Vec::new();
        for row in client.query(&query).await? {
            let name = required_text(&row, "name", table)?;
            if self.options.is_column_ignored(table, &name) {
                continue;
            }

            let is_primary_key = int(&row, "pk") > 0;
            columns.push(ColumnDefinition {
                name,
                column_type: text(&row, "type").unwrap_or_default(),
                is_primary_key,
                // SQLite reports notnull = 0 for INTEGER PRIMARY KEY, which can never hold NULL.
                is_nullable: int(&row, "notnull") == 0 && !is_primary_key,
                position: 0,
                default_value: text(&row, "dflt_value"),
            });
        }

        Ok(columns)
    }
}

/// Explicitly created indexes only; automatic indexes backing PRIMARY KEY and
/// UNIQUE constraints belong to the table definition.
async fn read_indexes(client: &dyn DbClient, table: &str) -> Result<Vec<IndexDefinition>, DbError> {
    let query = format!(
        "SELECT name, \"unique\", origin FROM pragma_index_list({}) ORDER BY name",
        sql_literal(table)
    );

    let mut indexes = Vec::new();
    for row in client.query(&query).await? {
        if text(&row, "origin").as_deref() != Some("c") {
            continue;
        }
        let name = required_text(&row, "name", table)?;

        let column_query = format!(
            "SELECT name FROM pragma_index_info({}) ORDER BY seqno",
            sql_literal(&name)
        );
        let columns: Vec<String> = client
            .query(&column_query)
            .await?
            .iter()
            .filter_map(|row| text(row, "name"))
            .collect();

        let mut index = IndexDefinition::new(name, table, columns);
        index.is_unique = int(&row, "unique") != 0;
        indexes.push(index);
    }

    Ok(indexes)
}

async fn read_foreign_keys(
    client: &dyn DbClient,
    table: &str,
) -> Result<Vec<ForeignKeyDefinition>, DbError> {
    let query = format!(
        "SELECT id, seq, \"table\", \"from\", \"to\", on_update, on_delete \
         FROM pragma_foreign_key_list({}) ORDER BY id, seq",
        sql_literal(table)
    );

    let mut foreign_keys = Vec::new();
    for row in client.query(&query).await? {
        let referenced_table = required_text(&row, "table", table)?;
        let referenced_column = match text(&row, "to") {
            Some(column) => column,
            None => implicit_reference(client, &referenced_table, int(&row, "seq")).await?,
        };

        foreign_keys.push(
            ForeignKeyDefinition::new(
                required_text(&row, "from", table)?,
                referenced_table,
                referenced_column,
            )
            .on_delete(&text(&row, "on_delete").unwrap_or_default())
            .on_update(&text(&row, "on_update").unwrap_or_default()),
        );
    }

    Ok(foreign_keys)
}

/// `REFERENCES parent` without a column list targets the parent's primary key.
async fn implicit_reference(
    client: &dyn DbClient,
    referenced_table: &str,
    seq: i64,
) -> Result<String, DbError> {
    let query = format!(
        "SELECT name FROM pragma_table_info({}) WHERE pk > 0 ORDER BY pk",
        sql_literal(referenced_table)
    );
    let rows = client.query(&query).await?;

    Ok(usize::try_from(seq)
        .ok()
        .and_then(|seq| rows.get(seq))
        .and_then(|row| text(row, "name"))
        .unwrap_or_else(|| "rowid".to_string()))
}

fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn text(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required_text(row: &Value, key: &str, context: &str) -> Result<String, DbError> {
    text(row, key).ok_or_else(|| {
        DbError::Introspection(format!("missing '{}' in catalog row for {}", key, context))
    })
}

fn int(row: &Value, key: &str) -> i64 {
    match row.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Transaction;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned catalog rows and counts the queries it answers.
    struct CatalogFake {
        queries: AtomicUsize,
        fail: bool,
    }

    impl CatalogFake {
        fn new() -> Self {
            Self {
                queries: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl DbClient for CatalogFake {
        async fn execute(&self, _query: &str) -> Result<(), DbError> {
            Ok(())
        }

        async fn query(&self, query: &str) -> Result<Vec<Value>, DbError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DbError::Connection("connection reset".to_string()));
            }

            let rows = if query == TABLES_QUERY {
                json!([
                    { "name": "Clips", "sql": "CREATE TABLE Clips (...)" },
                    { "name": "legacy_audit", "sql": "CREATE TABLE legacy_audit (...)" }
                ])
            } else if query == INDEX_SQL_QUERY {
                json!([{ "name": "IX_Clips_Hash", "sql": "CREATE INDEX IX_Clips_Hash ON Clips (Hash)" }])
            } else if query.contains("pragma_table_info('Clips')") {
                json!([
                    { "cid": 0, "name": "Id", "type": "INTEGER", "notnull": 0, "dflt_value": null, "pk": 1 },
                    { "cid": 1, "name": "SyncToken", "type": "BLOB", "notnull": 0, "dflt_value": null, "pk": 0 },
                    { "cid": 2, "name": "Hash", "type": "TEXT", "notnull": 1, "dflt_value": "''", "pk": 0 },
                    { "cid": 3, "name": "ParentId", "type": "INTEGER", "notnull": 0, "dflt_value": null, "pk": 0 }
                ])
            } else if query.contains("pragma_index_list('Clips')") {
                json!([
                    { "name": "IX_Clips_Hash", "unique": 0, "origin": "c" },
                    { "name": "sqlite_autoindex_Clips_1", "unique": 1, "origin": "u" }
                ])
            } else if query.contains("pragma_index_info('IX_Clips_Hash')") {
                json!([{ "name": "Hash" }])
            } else if query.contains("pragma_foreign_key_list('Clips')") {
                json!([{
                    "id": 0, "seq": 0, "table": "Clips", "from": "ParentId", "to": null,
                    "on_update": "NO ACTION", "on_delete": "cascade"
                }])
            } else {
                json!([])
            };

            Ok(rows.as_array().cloned().unwrap_or_default())
        }

        async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, DbError> {
            Err(DbError::Transaction("not supported".to_string()))
        }
    }

    fn options() -> SchemaOptions {
        SchemaOptions::new()
            .ignore_table("legacy_audit")
            .ignore_column("Clips", "SyncToken")
    }

    #[tokio::test]
    async fn test_read_schema_applies_ignore_lists() {
        let reader = SchemaReader::new(options());
        let schema = reader.read_schema(&CatalogFake::new()).await.unwrap();

        assert_eq!(schema.len(), 1);
        let clips = schema.table("Clips").unwrap();
        let names: Vec<&str> = clips.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Id", "Hash", "ParentId"]);
        let positions: Vec<usize> = clips.columns.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_read_schema_maps_catalog_rows() {
        let reader = SchemaReader::new(options());
        let schema = reader.read_schema(&CatalogFake::new()).await.unwrap();
        let clips = schema.table("Clips").unwrap();

        assert!(clips.columns[0].is_primary_key);
        assert!(!clips.columns[0].is_nullable);
        assert!(!clips.columns[1].is_nullable);
        assert_eq!(clips.columns[1].default_value.as_deref(), Some("''"));

        assert_eq!(clips.indexes.len(), 1);
        assert_eq!(clips.indexes[0].name, "IX_Clips_Hash");
        assert_eq!(clips.indexes[0].columns, vec!["Hash".to_string()]);
        assert!(clips.indexes[0].create_sql.is_some());

        let fk = &clips.foreign_keys[0];
        assert_eq!(fk.referenced_column, "Id");
        assert_eq!(fk.on_delete, "CASCADE");
        assert_eq!(fk.on_update, "NO ACTION");
    }

    #[tokio::test]
    async fn test_caching_returns_same_snapshot() {
        let client = CatalogFake::new();
        let reader = SchemaReader::new(options().with_caching(true));

        let first = reader.read_schema(&client).await.unwrap();
        let issued = client.queries.load(Ordering::SeqCst);
        let second = reader.read_schema(&client).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(client.queries.load(Ordering::SeqCst), issued);

        reader.invalidate_cache().await;
        let third = reader.read_schema(&client).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_without_caching_every_call_reads() {
        let client = CatalogFake::new();
        let reader = SchemaReader::new(options());

        let first = reader.read_schema(&client).await.unwrap();
        let second = reader.read_schema(&client).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_connection_failure_propagates() {
        let client = CatalogFake {
            queries: AtomicUsize::new(0),
            fail: true,
        };
        let reader = SchemaReader::new(options().with_caching(true));

        let result = reader.read_schema(&client).await;
        assert!(matches!(result, Err(DbError::Connection(_))));
    }
}
