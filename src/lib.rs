use db::{sqlite::SqliteClient, DbClient};
use errors::DbError;
use log::{info, warn};
use models::{
    connections::ConnectionConfig,
    migration::{MigrationResult, SchemaDiff, ValidationResult},
    options::SchemaOptions,
    schema::SchemaDefinition,
};
use schema::{MigrationHook, SchemaComparer, SchemaMigrator, SchemaReader, SchemaValidator};
use std::sync::Arc;

pub mod db;
pub mod errors;
pub mod models;
pub mod schema;

/// Keeps a live database in step with a declared target schema.
///
/// Runs the whole pipeline: validate the expected schema, read the current one,
/// diff the two and apply the additive changes.
pub struct SchemaManager {
    client: Arc<dyn DbClient>,
    reader: SchemaReader,
    validator: SchemaValidator,
    comparer: SchemaComparer,
    hook: Option<Arc<dyn MigrationHook>>,
}

impl SchemaManager {
    pub fn new(client: Arc<dyn DbClient>, options: SchemaOptions) -> Self {
        SchemaManager {
            client,
            reader: SchemaReader::new(options),
            validator: SchemaValidator::new(),
            comparer: SchemaComparer::new(),
            hook: None,
        }
    }

    pub async fn connect(config: &ConnectionConfig, options: SchemaOptions) -> Result<Self, DbError> {
        let client = SqliteClient::from_config(config).await?;
        Ok(Self::new(Arc::new(client), options))
    }

    pub fn with_hook(mut self, hook: Arc<dyn MigrationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub async fn current_schema(&self) -> Result<Arc<SchemaDefinition>, DbError> {
        self.reader.read_schema(self.client.as_ref()).await
    }

    pub fn validate(&self, expected: &SchemaDefinition) -> ValidationResult {
        self.validator.validate(expected)
    }

    /// Validates `expected` and computes the diff against the live database.
    pub async fn plan(&self, expected: &SchemaDefinition) -> Result<SchemaDiff, DbError> {
        let validation = self.validate(expected);
        for warning in &validation.warnings {
            warn!("Schema validation: {}", warning);
        }
        if !validation.is_valid() {
            return Err(DbError::Validation(validation.errors));
        }

        let current = self.current_schema().await?;
        let diff = self.comparer.compare(&current, expected);
        for warning in &diff.warnings {
            warn!("Schema drift: {}", warning);
        }
        Ok(diff)
    }

    /// Plans and applies the changes. An invalid expected schema is refused with
    /// [`DbError::Validation`] before anything touches the database; a failed
    /// migration is reported through the returned result.
    pub async fn synchronize(
        &self,
        expected: &SchemaDefinition,
        dry_run: bool,
    ) -> Result<MigrationResult, DbError> {
        let diff = self.plan(expected).await?;
        if !diff.has_changes() {
            info!("Database schema is up to date");
        }

        let mut migrator = SchemaMigrator::new(self.client.as_ref());
        if let Some(hook) = &self.hook {
            migrator = migrator.with_hook(Arc::clone(hook));
        }
        let result = migrator.migrate(&diff, dry_run).await;

        if result.success && !dry_run && diff.has_changes() {
            self.reader.invalidate_cache().await;
        }
        Ok(result)
    }
}
