use crate::errors::DbError;
use async_trait::async_trait;

pub mod sqlite;

/// A live connection capable of running arbitrary SQL text.
#[async_trait]
pub trait DbClient: Send + Sync {
    async fn execute(&self, query: &str) -> Result<(), DbError>;
    /// Runs a query and returns each row as a JSON object keyed by column name.
    async fn query(&self, query: &str) -> Result<Vec<serde_json::Value>, DbError>;
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>, DbError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, query: &str) -> Result<(), DbError>;
    async fn commit(self: Box<Self>) -> Result<(), DbError>;
    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
