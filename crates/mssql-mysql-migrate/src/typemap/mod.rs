//! Type mapping between MSSQL and MySQL.
//!
//! Lengths are the byte lengths reported by `sys.columns`, so the wide
//! character types (`nchar`, `nvarchar`) are halved to get a character count.

use chrono::NaiveDateTime;

use crate::core::identifier::quote_mysql;
use crate::core::{ColumnSpec, SqlValue, TableSchema};
use crate::error::Result;

/// Wall-clock format used for MySQL DATETIME literals and parameters.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Map an MSSQL data type to MySQL.
pub fn map_type(mssql_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    match mssql_type.to_lowercase().as_str() {
        // Integer types
        "int" => "INT".to_string(),
        "bigint" => "BIGINT".to_string(),
        "smallint" => "SMALLINT".to_string(),
        "tinyint" => "TINYINT".to_string(),
        "bit" => "BOOLEAN".to_string(),

        // Decimal/numeric
        "decimal" | "numeric" => format!("DECIMAL({},{})", precision, scale),
        "money" => "DECIMAL(19,4)".to_string(),
        "smallmoney" => "DECIMAL(10,4)".to_string(),

        // Floating point
        "float" => "DOUBLE".to_string(),
        "real" => "FLOAT".to_string(),

        // Date/time types
        "datetime" | "datetime2" | "smalldatetime" => "DATETIME".to_string(),
        "date" => "DATE".to_string(),
        "time" => "TIME".to_string(),
        "datetimeoffset" => "TIMESTAMP".to_string(),

        // String types
        "varchar" => sized("VARCHAR", max_length),
        "nvarchar" => sized("VARCHAR", wide(max_length)),
        "char" => sized("CHAR", max_length),
        "nchar" => sized("CHAR", wide(max_length)),
        "text" | "ntext" => "TEXT".to_string(),

        // GUID
        "uniqueidentifier" => "VARCHAR(36)".to_string(),

        // Binary types
        "binary" | "varbinary" => {
            if max_length > 0 {
                format!("VARBINARY({})", max_length)
            } else {
                "LONGBLOB".to_string()
            }
        }
        "image" => "LONGBLOB".to_string(),
        "timestamp" | "rowversion" => "BINARY(8)".to_string(),

        // Unknown types fall back to text
        _ => "TEXT".to_string(),
    }
}

fn wide(max_length: i32) -> i32 {
    if max_length == -1 {
        -1
    } else {
        max_length / 2
    }
}

fn sized(base: &str, length: i32) -> String {
    if length == -1 {
        "TEXT".to_string()
    } else {
        format!("{}({})", base, length)
    }
}

/// Column definition line for a MySQL CREATE TABLE.
pub fn map_column(col: &ColumnSpec) -> Result<String> {
    let mut def = format!(
        "{} {}",
        quote_mysql(&col.name)?,
        map_type(&col.data_type, col.max_length, col.precision, col.scale)
    );
    if !col.is_nullable {
        def.push_str(" NOT NULL");
    }
    if col.is_identity {
        def.push_str(" AUTO_INCREMENT");
    }
    Ok(def)
}

/// Generate the MySQL CREATE TABLE statement for a table.
///
/// Defaults, indexes other than the primary key, and constraints are not
/// carried over.
pub fn generate_create_sql(table: &TableSchema) -> Result<String> {
    let mut lines = table
        .columns
        .iter()
        .map(|c| map_column(c).map(|def| format!("  {}", def)))
        .collect::<Result<Vec<_>>>()?;

    let pk: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| quote_mysql(&c.name))
        .collect::<Result<_>>()?;
    if !pk.is_empty() {
        lines.push(format!("  PRIMARY KEY ({})", pk.join(", ")));
    }

    Ok(format!(
        "CREATE TABLE {} (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
        quote_mysql(&table.name)?,
        lines.join(",\n")
    ))
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS`, dropping fractional seconds.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Convert a source value into the form written to MySQL.
///
/// Temporal values become naive `YYYY-MM-DD HH:MM:SS` text (an offset value
/// keeps its local wall-clock time), booleans become 0/1, everything else is
/// passed through.
pub fn transcode(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Bool(b) => SqlValue::I32(i32::from(b)),
        v @ (SqlValue::DateTime(_) | SqlValue::DateTimeOffset(_) | SqlValue::Date(_)) => {
            match v.as_naive_datetime() {
                Some(ts) => SqlValue::Text(format_timestamp(&ts)),
                None => v,
            }
        }
        other => other,
    }
}
