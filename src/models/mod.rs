pub mod connections;
pub mod migration;
pub mod options;
pub mod schema;
