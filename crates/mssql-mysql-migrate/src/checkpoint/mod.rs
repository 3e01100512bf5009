//! Per-table checkpoint derived from live target state.
//!
//! Nothing here is persisted. Every run asks the target how many rows a
//! table holds and where its watermarks are, so an interrupted run resumes
//! from what actually landed.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{TableSchema, TargetSession};
use crate::error::Result;

/// Coarse state of a table in the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Table exists and holds no rows.
    Empty,

    /// Table does not exist in the target yet.
    NoTargetTable,

    /// Fewer rows than the source had at extraction time.
    Partial,

    /// At least as many rows as expected; only updates can be missing.
    NeedsSync,
}

impl MigrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationState::Empty => "empty",
            MigrationState::NoTargetTable => "no_target_table",
            MigrationState::Partial => "partial",
            MigrationState::NeedsSync => "needs_sync",
        }
    }
}

/// Checkpoint of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub state: MigrationState,

    /// Rows currently in the target table.
    pub current_rows: i64,

    /// Source row count from the schema snapshot.
    pub expected_rows: i64,

    /// Highest identity value in the target.
    pub last_id: Option<i64>,

    /// Highest modification timestamp in the target.
    pub last_modified: Option<NaiveDateTime>,
}

impl MigrationStatus {
    fn without_rows(state: MigrationState, expected_rows: i64) -> Self {
        Self {
            state,
            current_rows: 0,
            expected_rows,
            last_id: None,
            last_modified: None,
        }
    }

    /// Status of a table that was just created.
    pub fn empty(expected_rows: i64) -> Self {
        Self::without_rows(MigrationState::Empty, expected_rows)
    }
}

/// Compute the checkpoint of `schema` from the target.
pub async fn resolve(target: &dyn TargetSession, schema: &TableSchema) -> Result<MigrationStatus> {
    let expected = schema.row_count;

    let current = match target.row_count(&schema.name).await? {
        None => {
            return Ok(MigrationStatus::without_rows(
                MigrationState::NoTargetTable,
                expected,
            ))
        }
        Some(0) => return Ok(MigrationStatus::empty(expected)),
        Some(n) => n,
    };

    let last_id = match schema.identity_column() {
        Some(col) => target.max_identity(&schema.name, &col.name).await?,
        None => None,
    };

    let last_modified = match schema.modification_column() {
        Some(col) => match target.max_timestamp(&schema.name, &col.name).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(
                    "{}: could not read MAX({}), continuing without timestamp watermark: {}",
                    schema.name, col.name, e
                );
                None
            }
        },
        None => None,
    };

    let state = if current >= expected {
        MigrationState::NeedsSync
    } else {
        MigrationState::Partial
    };

    debug!(
        "{}: {} ({}/{} rows, last_id={:?}, last_modified={:?})",
        schema.name,
        state.as_str(),
        current,
        expected,
        last_id,
        last_modified
    );

    Ok(MigrationStatus {
        state,
        current_rows: current,
        expected_rows: expected,
        last_id,
        last_modified,
    })
}
