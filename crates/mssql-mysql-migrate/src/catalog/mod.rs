//! Schema snapshot file and the catalog that serves it.
//!
//! `extract-schema` writes a [`SchemaSnapshot`]; `run` loads it through
//! [`JsonSchemaCatalog`]. Tables keep extraction order in the file.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{SchemaCatalog, TableSchema};
use crate::error::{MigrateError, Result};
use crate::remap::write_atomic;

/// On-disk schema snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Source database the snapshot was taken from.
    #[serde(default)]
    pub database: String,

    /// When the snapshot was taken.
    pub extracted_at: DateTime<Utc>,

    /// Tables in extraction order.
    pub tables: Vec<TableSchema>,
}

impl SchemaSnapshot {
    pub fn new(database: impl Into<String>, tables: Vec<TableSchema>) -> Self {
        Self {
            database: database.into(),
            extracted_at: Utc::now(),
            tables,
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::SchemaCatalog(format!(
                "cannot read schema file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut snapshot: SchemaSnapshot = serde_json::from_str(&content)?;
        for table in &mut snapshot.tables {
            table.normalize_capabilities();
        }
        Ok(snapshot)
    }

    /// Write the snapshot atomically, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, &content)?;
        info!(
            "Wrote schema for {} tables to {}",
            self.tables.len(),
            path.display()
        );
        Ok(())
    }
}

/// Catalog backed by a schema snapshot file.
#[derive(Debug, Clone)]
pub struct JsonSchemaCatalog {
    tables: Vec<TableSchema>,
}

impl JsonSchemaCatalog {
    /// Load the catalog from a snapshot file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_snapshot(SchemaSnapshot::load(path)?))
    }

    pub fn from_snapshot(snapshot: SchemaSnapshot) -> Self {
        Self {
            tables: snapshot.tables,
        }
    }

    /// Build a catalog from tables already in memory.
    pub fn from_tables(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }
}

impl SchemaCatalog for JsonSchemaCatalog {
    fn get_schema(&self, name: &str) -> Result<TableSchema> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .ok_or_else(|| MigrateError::SchemaCatalog(format!("table '{}' not found", name)))
    }

    fn get_all_schemas(&self) -> Result<Vec<TableSchema>> {
        Ok(self.tables.clone())
    }
}
