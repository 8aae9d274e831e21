pub mod comparer;
pub mod migrator;
pub mod reader;
pub mod validator;

pub use comparer::SchemaComparer;
pub use migrator::{MigrationHook, SchemaMigrator};
pub use reader::SchemaReader;
pub use validator::SchemaValidator;
