//! Core types shared by the engine and the drivers:
//!
//! - [`schema`]: table and column metadata
//! - [`value`]: row values
//! - [`traits`]: catalog and session traits the engine runs against
//! - [`identifier`]: identifier validation and quoting

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{ColumnSpec, TableSchema};
pub use traits::{SchemaCatalog, SourceSession, TargetSession, WriteMode, WriteResult};
pub use value::{Row, SqlValue};
