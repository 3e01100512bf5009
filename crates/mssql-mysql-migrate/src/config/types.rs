//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target database configuration (MySQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Source schema (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Target database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, prefer, require, verify_ca, verify_identity (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows fetched and applied per batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows written concurrently inside one batch (default: 1, sequential).
    #[serde(default = "default_apply_concurrency")]
    pub apply_concurrency: usize,

    /// Fraction of failed rows above which a table is failed.
    /// `null` tolerates any number of row failures.
    #[serde(default = "default_failure_ratio")]
    pub max_row_failure_ratio: Option<f64>,

    /// Rows that must be attempted before the failure ratio is enforced.
    #[serde(default = "default_min_rows_for_ratio")]
    pub min_rows_for_failure_ratio: u64,

    /// Schema snapshot written by `extract-schema` and read by `run`.
    #[serde(default = "default_schema_file")]
    pub schema_file: PathBuf,

    /// Identifier remap file written at the end of every run.
    #[serde(default = "default_remap_file")]
    pub remap_file: PathBuf,

    /// Case-insensitive name fragments marking a modification-timestamp column.
    #[serde(default = "default_modification_patterns")]
    pub modification_column_patterns: Vec<String>,

    /// Re-read tables without identity or modification column from the start
    /// instead of from the current target row count.
    #[serde(default)]
    pub rescan_unkeyed_tables: bool,

    /// Fetch new rows and updated rows of a partial table in two passes
    /// instead of one OR-combined query.
    #[serde(default)]
    pub split_partial_passes: bool,

    /// Tables to include in a full run (exact names, empty = all).
    #[serde(default)]
    pub include_tables: Vec<String>,

    /// Tables to exclude from a full run (exact names).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Named groups of tables that can be migrated together.
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            apply_concurrency: default_apply_concurrency(),
            max_row_failure_ratio: default_failure_ratio(),
            min_rows_for_failure_ratio: default_min_rows_for_ratio(),
            schema_file: default_schema_file(),
            remap_file: default_remap_file(),
            modification_column_patterns: default_modification_patterns(),
            rescan_unkeyed_tables: false,
            split_partial_passes: false,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
            phases: Vec::new(),
        }
    }
}

impl MigrationConfig {
    /// Whether a table takes part in a full run.
    pub fn is_table_selected(&self, name: &str) -> bool {
        if self.exclude_tables.iter().any(|t| t == name) {
            return false;
        }
        self.include_tables.is_empty() || self.include_tables.iter().any(|t| t == name)
    }

    /// Look up a phase by name (case-insensitive).
    pub fn phase(&self, name: &str) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// A named, ordered group of tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Phase name used on the command line.
    pub name: String,

    /// Free-form description shown by `phases`.
    #[serde(default)]
    pub description: String,

    /// Tables migrated by this phase, in order.
    pub tables: Vec<String>,

    /// Sequential runs stop before this phase; it only runs when named.
    #[serde(default)]
    pub manual: bool,
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    1000
}

fn default_apply_concurrency() -> usize {
    1
}

fn default_failure_ratio() -> Option<f64> {
    Some(0.10)
}

fn default_min_rows_for_ratio() -> u64 {
    100
}

fn default_schema_file() -> PathBuf {
    PathBuf::from("schemas/complete-schema.json")
}

fn default_remap_file() -> PathBuf {
    PathBuf::from("id-mappings.json")
}

pub(crate) fn default_modification_patterns() -> Vec<String> {
    ["updatedat", "updated_at", "dataalteracao", "datamodificacao"]
        .into_iter()
        .map(String::from)
        .collect()
}
