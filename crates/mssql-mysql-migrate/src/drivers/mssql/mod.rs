//! Microsoft SQL Server source.
//!
//! - [`MssqlSource`]: pooled Tiberius session that extracts the schema
//!   snapshot and reads pages for the migration.

mod reader;
mod schema;

pub use reader::MssqlSource;
