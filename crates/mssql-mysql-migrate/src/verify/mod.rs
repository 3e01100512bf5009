//! Post-migration row count validation.
//!
//! Compares `COUNT(*)` of each table between source and target. Counts are
//! read live, so a source that is still being written to can show a
//! difference that a later run closes.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{SourceSession, TargetSession};
use crate::error::Result;

/// Count comparison for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCountCheck {
    pub table: String,
    pub source_rows: i64,

    /// `None` when the target table does not exist.
    pub target_rows: Option<i64>,
}

impl TableCountCheck {
    pub fn is_in_sync(&self) -> bool {
        self.target_rows == Some(self.source_rows)
    }

    /// Source rows not (yet) present in the target. Negative when the
    /// target holds more rows than the source.
    pub fn missing(&self) -> i64 {
        self.source_rows - self.target_rows.unwrap_or(0)
    }
}

/// Validation result for all checked tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyResult {
    pub tables: Vec<TableCountCheck>,
    pub tables_in_sync: usize,
    pub tables_with_differences: usize,
    pub duration_ms: u64,
}

impl VerifyResult {
    pub fn add_table(&mut self, check: TableCountCheck) {
        if check.is_in_sync() {
            self.tables_in_sync += 1;
        } else {
            self.tables_with_differences += 1;
        }
        self.tables.push(check);
    }

    pub fn is_in_sync(&self) -> bool {
        self.tables_with_differences == 0
    }
}

/// Compare row counts of `tables`. Query errors abort the validation.
pub async fn validate_counts(
    source: &dyn SourceSession,
    target: &dyn TargetSession,
    tables: &[String],
) -> Result<VerifyResult> {
    let started = Instant::now();
    let mut result = VerifyResult::default();

    for table in tables {
        let check = TableCountCheck {
            table: table.clone(),
            source_rows: source.row_count(table).await?,
            target_rows: target.row_count(table).await?,
        };

        match check.target_rows {
            _ if check.is_in_sync() => info!("{}: {} rows, in sync", table, check.source_rows),
            None => warn!("{}: target table missing ({} source rows)", table, check.source_rows),
            Some(target_rows) => warn!(
                "{}: source={} target={} ({} missing)",
                table,
                check.source_rows,
                target_rows,
                check.missing()
            ),
        }
        result.add_table(check);
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        "Validation: {} tables in sync, {} with differences",
        result.tables_in_sync, result.tables_with_differences
    );
    Ok(result)
}
