use std::env;

use log::{error, info};
use schemasync::models::{connections::ConnectionConfig, options::SchemaOptions, schema::SchemaDefinition};
use schemasync::SchemaManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ConnectionConfig::from_env()?;
    let schema_file = env::var("SCHEMA_FILE").unwrap_or_else(|_| "schema.json".to_string());
    let dry_run = env::var("DRY_RUN").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let options = match env::var("SCHEMA_OPTIONS_FILE") {
        Ok(path) => serde_json::from_str::<SchemaOptions>(&std::fs::read_to_string(path)?)?,
        Err(_) => SchemaOptions::default(),
    };

    let expected = SchemaDefinition::from_json_file(&schema_file)?;
    let manager = SchemaManager::connect(&config, options).await?;

    let result = manager.synchronize(&expected, dry_run).await?;
    for sql in &result.sql_executed {
        info!("{}{}", if dry_run { "[dry run] " } else { "" }, sql);
    }
    if !result.success {
        for err in &result.errors {
            error!("{}", err);
        }
        return Err("schema migration failed; database left unchanged".into());
    }

    Ok(())
}
