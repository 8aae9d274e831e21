use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Column, Row, SqlitePool,
};

use crate::{errors::DbError, models::connections::ConnectionConfig};

use super::{DbClient, Transaction};

pub struct SqliteClient {
    pub pool: SqlitePool,
}

impl SqliteClient {
    pub async fn connect(database_url: &str) -> Result<Self, DbError> {
        Self::from_config(&ConnectionConfig::new(database_url)).await
    }

    pub async fn from_config(config: &ConnectionConfig) -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| DbError::Config(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::Sqlx)?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(DbError::Sqlx))
            .collect()
    }
}

/// Decodes one column into the JSON type matching its runtime storage class.
fn column_value(row: &SqliteRow, index: usize) -> Value {
    if let Ok(val) = row.try_get::<Option<i64>, _>(index) {
        return val.map_or(Value::Null, Value::from);
    }
    if let Ok(val) = row.try_get::<Option<f64>, _>(index) {
        return val.map_or(Value::Null, Value::from);
    }
    if let Ok(val) = row.try_get::<Option<String>, _>(index) {
        return val.map_or(Value::Null, Value::String);
    }
    Value::Null
}

#[async_trait]
impl DbClient for SqliteClient {
    async fn execute(&self, query: &str) -> Result<(), DbError> {
        sqlx::query(query)
            .execute(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(())
    }

    async fn query(&self, query: &str) -> Result<Vec<serde_json::Value>, DbError> {
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Sqlx)?;

        let results = rows
            .iter()
            .map(|row| {
                let json_map = row
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, column)| (column.name().to_string(), column_value(row, i)))
                    .collect();

                Value::Object(json_map)
            })
            .collect();

        Ok(results)
    }

    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, DbError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }
}

pub struct SqliteTransaction<'a> {
    tx: sqlx::Transaction<'a, sqlx::Sqlite>,
}

#[async_trait]
impl<'a> Transaction for SqliteTransaction<'a> {
    async fn execute(&mut self, query: &str) -> Result<(), DbError> {
        sqlx::query(query)
            .execute(&mut *self.tx)
            .await
            .map_err(DbError::Sqlx)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::Transaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_client() -> (TempDir, SqliteClient) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let client = SqliteClient::connect(&url).await.unwrap();
        (dir, client)
    }

    #[tokio::test]
    async fn test_query_decodes_storage_classes() {
        let (_dir, client) = temp_client().await;

        let rows = client
            .query("SELECT 42 AS answer, 1.5 AS ratio, 'hello' AS greeting, NULL AS empty")
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["answer"], 42);
        assert_eq!(rows[0]["ratio"], 1.5);
        assert_eq!(rows[0]["greeting"], "hello");
        assert!(rows[0]["empty"].is_null());
    }

    #[tokio::test]
    async fn test_list_tables_skips_internal_tables() {
        let (_dir, client) = temp_client().await;

        client
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)")
            .await
            .unwrap();

        let tables = client.list_tables().await.unwrap();
        assert_eq!(tables, vec!["users".to_string()]);
    }

    #[tokio::test]
    async fn test_list_tables_keeps_names_close_to_the_internal_prefix() {
        let (_dir, client) = temp_client().await;

        client.execute("CREATE TABLE sqliteX (id INTEGER)").await.unwrap();
        client.execute("CREATE TABLE sqlite1_notes (id INTEGER)").await.unwrap();

        let tables = client.list_tables().await.unwrap();
        assert_eq!(tables, vec!["sqlite1_notes".to_string(), "sqliteX".to_string()]);
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_ddl() {
        let (_dir, client) = temp_client().await;

        let mut tx = client.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE scratch (id INTEGER)").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(client.list_tables().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commit_keeps_ddl() {
        let (_dir, client) = temp_client().await;

        let mut tx = client.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE kept (id INTEGER)").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(client.list_tables().await.unwrap(), vec!["kept".to_string()]);
    }
}
