//! # mssql-mysql-migrate
//!
//! Resumable, incremental MSSQL to MySQL table migration library.
//!
//! Every run reads the current state of each target table, decides what is
//! still missing or changed, and moves only those rows:
//!
//! - **Checkpoints derived from the target**: row counts and `MAX` watermarks,
//!   no side state file
//! - **Incremental selection** by identity and modification timestamp
//! - **Idempotent writes**: insert-ignore while catching up, upsert once in sync
//! - **Row-level fault tolerance** with a per-table failure ratio
//! - **Identifier remap** for rows the target renumbered
//! - **Type mapping** between MSSQL and MySQL
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_mysql_migrate::{Config, Coordinator};
//!
//! #[tokio::main]
//! async fn main() -> mssql_mysql_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let coordinator = Coordinator::connect(&config).await?;
//!     let result = coordinator.run_all().await?;
//!     println!("Inserted {} rows", result.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod query;
pub mod remap;
pub mod typemap;
pub mod verify;

// Re-exports for convenient access
pub use apply::{ApplyOutcome, BatchApplier, RunContext};
pub use catalog::{JsonSchemaCatalog, SchemaSnapshot};
pub use checkpoint::{MigrationState, MigrationStatus};
pub use config::{Config, MigrationConfig, PhaseConfig, SourceConfig, TargetConfig};
pub use core::{
    ColumnSpec, Row, SchemaCatalog, SourceSession, SqlValue, TableSchema, TargetSession,
    WriteMode, WriteResult,
};
pub use drivers::mssql::MssqlSource;
pub use drivers::mysql::MysqlTarget;
pub use error::{MigrateError, Result};
pub use orchestrator::{
    Coordinator, MigrationResult, PhaseCheck, ProgressEvent, ProgressSink, TablePhase,
    TableReport,
};
pub use remap::IdentifierRemap;
pub use verify::{validate_counts, TableCountCheck, VerifyResult};
