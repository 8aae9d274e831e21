use std::env;

use serde::{Deserialize, Serialize};

use crate::errors::DbError;

fn default_max_connections() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConnectionConfig {
    pub database_url: String,
    /// Migrations run on a single exclusively owned connection, so this stays at 1
    /// unless the caller shares the pool with other work.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl ConnectionConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: default_max_connections(),
        }
    }

    /// Reads `DATABASE_URL` and the optional `DATABASE_MAX_CONNECTIONS`, loading `.env` first.
    pub fn from_env() -> Result<Self, DbError> {
        dotenv::dotenv().ok();
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| DbError::Config("DATABASE_URL must be set".to_string()))?;

        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse::<u32>().map_err(|e| {
                DbError::Config(format!("invalid DATABASE_MAX_CONNECTIONS '{}': {}", raw, e))
            })?,
            Err(_) => default_max_connections(),
        };
        if max_connections == 0 {
            return Err(DbError::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            max_connections,
        })
    }
}
