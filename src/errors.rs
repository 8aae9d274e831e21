use thiserror::Error;

/// Error type for database access and schema synchronization.
#[derive(Error, Debug)]
pub enum DbError {
    /// Error raised by the driver while running a statement.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Catalog rows could not be read or did not have the expected shape.
    #[error("Introspection error: {0}")]
    Introspection(String),
    /// Configuration error (e.g., invalid database URL or missing parameters).
    #[error("Configuration error: {0}")]
    Config(String),
    /// Transaction error (e.g., failed to begin, commit or rollback a transaction).
    #[error("Transaction error: {0}")]
    Transaction(String),
    /// Connection error (e.g., the database file cannot be opened).
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The expected schema failed validation; each entry is one violation.
    #[error("Schema validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}
