//! Batch applier: transcode source rows and write them idempotently.
//!
//! Every row is an independent write. Duplicate-key conflicts are counted
//! as skipped, any other row error is logged and counted as failed, and the
//! batch carries on either way. Table-level errors never originate here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::checkpoint::MigrationState;
use crate::core::{Row, SqlValue, TableSchema, TargetSession, WriteMode, WriteResult};
use crate::error::Result;
use crate::orchestrator::progress::ProgressSink;
use crate::remap::IdentifierRemap;
use crate::typemap::transcode;

/// Per-run state shared by every table and row operation.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub remap: IdentifierRemap,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressSink>,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, progress: Option<ProgressSink>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            remap: IdentifierRemap::new(),
            cancel,
            progress,
        }
    }
}

/// Row counts of one batch, or summed over a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ApplyOutcome {
    /// Rows a write was attempted for.
    pub fn attempted(&self) -> u64 {
        self.inserted + self.updated + self.skipped + self.failed
    }

    /// Rows that are now present in the target.
    pub fn applied(&self) -> u64 {
        self.inserted + self.updated + self.skipped
    }

    pub fn merge(&mut self, other: &ApplyOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Whether the failure ratio is above `max_ratio`, once at least
    /// `min_rows` rows have been attempted. `None` tolerates everything.
    pub fn exceeds_failure_ratio(&self, max_ratio: Option<f64>, min_rows: u64) -> bool {
        let Some(max_ratio) = max_ratio else {
            return false;
        };
        let attempted = self.attempted();
        if attempted == 0 || attempted < min_rows {
            return false;
        }
        (self.failed as f64 / attempted as f64) > max_ratio
    }
}

#[derive(Default)]
struct Counters {
    inserted: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn outcome(&self) -> ApplyOutcome {
        ApplyOutcome {
            inserted: self.inserted.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Pick the write mode for one table invocation.
pub fn select_write_mode(schema: &TableSchema, state: MigrationState) -> WriteMode {
    match (schema.identity_column(), state) {
        (None, _) => WriteMode::Insert,
        (Some(_), MigrationState::NeedsSync) => WriteMode::Upsert,
        (Some(_), _) => WriteMode::InsertIgnore,
    }
}

/// Writes batches of rows to the target.
pub struct BatchApplier {
    target: Arc<dyn TargetSession>,
    concurrency: usize,
}

impl BatchApplier {
    /// `concurrency` is the number of row writes in flight at once.
    pub fn new(target: Arc<dyn TargetSession>, concurrency: usize) -> Self {
        Self {
            target,
            concurrency: concurrency.max(1),
        }
    }

    /// Apply one batch. Returns after every write has completed.
    pub async fn apply(
        &self,
        schema: &TableSchema,
        rows: Vec<Row>,
        mode: WriteMode,
        ctx: &RunContext,
    ) -> ApplyOutcome {
        let counters = Counters::default();
        let columns = schema.column_names();
        let identity_index = schema.identity_index();
        let identity_name = identity_index.map(|i| schema.columns[i].name.as_str());

        stream::iter(rows)
            .map(|row| {
                let source_id = identity_index
                    .and_then(|i| row.get(i))
                    .and_then(SqlValue::as_i64);
                let values: Vec<SqlValue> = row.into_iter().map(transcode).collect();
                let columns = &columns;
                let counters = &counters;
                async move {
                    let result = self
                        .target
                        .write_row(&schema.name, columns, &values, mode, identity_name)
                        .await;
                    record(&schema.name, source_id, result, counters, ctx);
                }
            })
            .buffer_unordered(self.concurrency)
            .for_each(|_| futures::future::ready(()))
            .await;

        let outcome = counters.outcome();
        debug!(
            "{}: batch applied ({} inserted, {} updated, {} skipped, {} failed)",
            schema.name, outcome.inserted, outcome.updated, outcome.skipped, outcome.failed
        );
        outcome
    }
}

fn record(
    table: &str,
    source_id: Option<i64>,
    result: Result<WriteResult>,
    counters: &Counters,
    ctx: &RunContext,
) {
    match result {
        Ok(w) if w.was_update => {
            counters.updated.fetch_add(1, Ordering::Relaxed);
        }
        Ok(w) if w.rows_affected == 0 => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(w) => {
            counters.inserted.fetch_add(1, Ordering::Relaxed);
            if let (Some(source), Some(assigned)) = (source_id, w.inserted_id) {
                if assigned != 0 && assigned != source {
                    ctx.remap.record(table, source, assigned);
                }
            }
        }
        Err(e) if e.is_duplicate_key() => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            match source_id {
                Some(id) => warn!("{}: row id={} failed: {}", table, id, e),
                None => warn!("{}: row failed: {}", table, e),
            }
        }
    }
}
