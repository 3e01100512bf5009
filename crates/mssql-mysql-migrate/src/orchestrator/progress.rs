//! Per-batch progress events.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

/// Receiver side is owned by whoever renders progress (the CLI prints JSON lines).
pub type ProgressSink = mpsc::UnboundedSender<ProgressEvent>;

/// Emitted after each applied batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub table: String,

    /// Rows fetched for this table so far in this run.
    pub migrated: u64,

    /// Source row count from the schema snapshot.
    pub expected: i64,

    /// `migrated / expected` in percent. Can exceed 100 when the source grew.
    pub percent: f64,

    /// Rows in the batch that triggered this event.
    pub batch_rows: usize,
}

impl ProgressEvent {
    pub fn new(table: &str, migrated: u64, expected: i64, batch_rows: usize) -> Self {
        let percent = if expected > 0 {
            migrated as f64 / expected as f64 * 100.0
        } else {
            100.0
        };
        Self {
            table: table.to_string(),
            migrated,
            expected,
            percent: (percent * 10.0).round() / 10.0,
            batch_rows,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} ({:.1}%)",
            self.table, self.migrated, self.expected, self.percent
        )
    }
}
