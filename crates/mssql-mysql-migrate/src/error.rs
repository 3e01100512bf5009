//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] mysql_async::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Table missing from the schema snapshot, or the snapshot is unreadable
    #[error("Schema catalog error: {0}")]
    SchemaCatalog(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Too many rows of one table failed to apply
    #[error("Table {table}: {failed} of {attempted} rows failed to apply, above the configured failure ratio")]
    RowFailureThreshold {
        table: String,
        failed: u64,
        attempted: u64,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Wrap a table-level failure with the table name, leaving errors that
    /// already carry one untouched.
    pub fn for_table(self, table: &str) -> Self {
        match self {
            e @ (MigrateError::Transfer { .. }
            | MigrateError::RowFailureThreshold { .. }
            | MigrateError::Cancelled) => e,
            other => MigrateError::transfer(table, other.to_string()),
        }
    }

    /// True when a write failed only because the row already exists
    /// (MySQL `ER_DUP_ENTRY`, code 1062).
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            MigrateError::Target(mysql_async::Error::Server(e)) => e.code == 1062,
            MigrateError::Transfer { message, .. } => message.contains("Duplicate entry"),
            _ => false,
        }
    }

    /// True when a CREATE failed because the object is already there
    /// (MySQL `ER_TABLE_EXISTS_ERROR`, code 1050).
    pub fn is_already_exists(&self) -> bool {
        match self {
            MigrateError::Target(mysql_async::Error::Server(e)) => e.code == 1050,
            other => other.to_string().contains("already exists"),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
