//! Table and column metadata as captured in the schema snapshot.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Table metadata.
///
/// `columns` order is the order values are fetched, transcoded and written
/// in. Every SELECT lists columns explicitly in this order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name (identical in source and target).
    pub name: String,

    /// Source row count at extraction time. Advisory only.
    #[serde(default)]
    pub row_count: i64,

    /// Column definitions.
    pub columns: Vec<ColumnSpec>,

    /// MySQL `CREATE TABLE` statement generated at extraction time.
    #[serde(default)]
    pub create_sql: String,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// Source data type (e.g., "int", "nvarchar", "datetime2").
    pub data_type: String,

    /// Maximum length in bytes for string/binary types (-1 for max).
    #[serde(default)]
    pub max_length: i32,

    /// Numeric precision.
    #[serde(default)]
    pub precision: i32,

    /// Numeric scale.
    #[serde(default)]
    pub scale: i32,

    /// Whether the column allows NULL.
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,

    /// Whether the column is an identity column.
    #[serde(default)]
    pub is_identity: bool,

    /// Whether the column is part of the primary key.
    #[serde(default)]
    pub is_primary_key: bool,

    /// Whether the column records the row's last modification time.
    #[serde(default)]
    pub is_modification_timestamp: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnSpec {
    /// Plain nullable column with no capabilities.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            is_primary_key: false,
            is_modification_timestamp: false,
        }
    }

    /// Whether the column holds a date or timestamp.
    pub fn is_temporal(&self) -> bool {
        is_date_type(&self.data_type.to_lowercase())
    }

    /// Whether the source must render this column as text before it can be read.
    pub fn reads_as_text(&self) -> bool {
        is_text_rendered_type(&self.data_type.to_lowercase())
    }
}

impl TableSchema {
    /// The identity column, if the table has one.
    pub fn identity_column(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_identity)
    }

    /// Position of the identity column in `columns`.
    pub fn identity_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.is_identity)
    }

    /// The modification-timestamp column, if the table has one.
    pub fn modification_column(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.is_modification_timestamp)
    }

    /// Column names in declared order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Flag the modification-timestamp column by name.
    ///
    /// The first temporal column whose lowercase name contains one of the
    /// patterns wins. An explicit flag already present in the schema is kept.
    pub fn resolve_modification_column(&mut self, patterns: &[String]) {
        if self.modification_column().is_some() {
            self.normalize_capabilities();
            return;
        }

        let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
        let found = self.columns.iter_mut().find(|c| {
            let name = c.name.to_lowercase();
            c.is_temporal() && patterns.iter().any(|p| name.contains(p.as_str()))
        });
        if let Some(col) = found {
            col.is_modification_timestamp = true;
        }
    }

    /// Keep at most one identity and one modification-timestamp column.
    pub fn normalize_capabilities(&mut self) {
        let table = self.name.clone();
        let mut identity_seen = false;
        let mut modification_seen = false;

        for col in &mut self.columns {
            if col.is_identity {
                if identity_seen {
                    warn!(
                        "{}: ignoring additional identity column '{}'",
                        table, col.name
                    );
                    col.is_identity = false;
                }
                identity_seen = true;
            }
            if col.is_modification_timestamp {
                if modification_seen {
                    warn!(
                        "{}: ignoring additional modification column '{}'",
                        table, col.name
                    );
                    col.is_modification_timestamp = false;
                }
                modification_seen = true;
            }
        }
    }
}

/// Whether a lowercase SQL Server type is a date/time type usable as a watermark.
pub fn is_date_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "datetime" | "datetime2" | "smalldatetime" | "date" | "datetimeoffset"
    )
}

/// Lowercase SQL Server types the TDS driver cannot decode into a value:
/// xml, CLR types and `sql_variant`. They are selected through
/// `CAST(.. AS NVARCHAR(MAX))`.
pub fn is_text_rendered_type(data_type: &str) -> bool {
    matches!(
        data_type,
        "xml" | "geography" | "geometry" | "hierarchyid" | "sql_variant"
    )
}
