//! Drives one table from checkpoint to last page.
//!
//! ```text
//! Pending -> Resolving -> (Skipped | Fetching) -> Applying -> Done
//! ```
//!
//! Resolving creates a missing target table before any skip decision.
//!
//! Any table-level error ends in `Failed` and is returned to the coordinator.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::apply::{select_write_mode, ApplyOutcome, BatchApplier, RunContext};
use crate::checkpoint::{self, MigrationState, MigrationStatus};
use crate::config::MigrationConfig;
use crate::core::{SourceSession, SqlValue, TableSchema, TargetSession, WriteMode};
use crate::error::{MigrateError, Result};
use crate::query::{self, Pagination, QueryOptions, SelectionQuery};
use crate::typemap::generate_create_sql;

use super::progress::ProgressEvent;

/// Lifecycle of a table within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePhase {
    Pending,
    Resolving,
    Fetching,
    Applying,
    Done,
    Skipped,
    Failed,
}

/// What happened to one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub phase: TablePhase,
    pub status_before: Option<MigrationStatus>,
    pub write_mode: Option<WriteMode>,
    pub outcome: ApplyOutcome,
    pub rows_fetched: u64,
    pub batches: u64,
    pub duration_seconds: f64,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            phase: TablePhase::Pending,
            status_before: None,
            write_mode: None,
            outcome: ApplyOutcome::default(),
            rows_fetched: 0,
            batches: 0,
            duration_seconds: 0.0,
            skip_reason: None,
            error: None,
        }
    }

    /// Report for a table that failed before or while running.
    pub fn failed(table: &str, error: &MigrateError) -> Self {
        let mut report = Self::new(table);
        report.phase = TablePhase::Failed;
        report.error = Some(error.to_string());
        report
    }

    fn transition(&mut self, next: TablePhase) {
        if self.phase != next {
            debug!("{}: {:?} -> {:?}", self.table, self.phase, next);
            self.phase = next;
        }
    }
}

/// Table-level settings taken from the migration config.
#[derive(Debug, Clone)]
pub struct TableSettings {
    pub batch_size: usize,
    pub max_row_failure_ratio: Option<f64>,
    pub min_rows_for_failure_ratio: u64,
    pub split_partial_passes: bool,
    pub query: QueryOptions,
}

impl From<&MigrationConfig> for TableSettings {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_row_failure_ratio: config.max_row_failure_ratio,
            min_rows_for_failure_ratio: config.min_rows_for_failure_ratio,
            split_partial_passes: config.split_partial_passes,
            query: QueryOptions {
                rescan_unkeyed_tables: config.rescan_unkeyed_tables,
            },
        }
    }
}

/// Runs the per-table state machine.
pub struct TableOrchestrator {
    source: Arc<dyn SourceSession>,
    target: Arc<dyn TargetSession>,
    applier: BatchApplier,
    settings: TableSettings,
}

impl TableOrchestrator {
    pub fn new(
        source: Arc<dyn SourceSession>,
        target: Arc<dyn TargetSession>,
        settings: TableSettings,
        apply_concurrency: usize,
    ) -> Self {
        let applier = BatchApplier::new(Arc::clone(&target), apply_concurrency);
        Self {
            source,
            target,
            applier,
            settings,
        }
    }

    /// Migrate one table. Row-level failures are counted in the report;
    /// anything returned as `Err` is a table-level failure.
    pub async fn run(&self, schema: &TableSchema, ctx: &RunContext) -> Result<TableReport> {
        let started = Instant::now();
        let mut report = TableReport::new(&schema.name);

        report.transition(TablePhase::Resolving);
        let mut status = checkpoint::resolve(self.target.as_ref(), schema).await?;
        report.status_before = Some(status.clone());

        if status.state == MigrationState::NoTargetTable {
            self.create_table(schema).await?;
            status = MigrationStatus::empty(schema.row_count);
        }

        // Empty source tables still get their target table.
        if schema.row_count <= 0 {
            return Ok(skip(report, "no rows expected", started));
        }

        if status.state == MigrationState::NeedsSync
            && status.last_modified.is_none()
            && !self.rescans(schema)
        {
            return Ok(skip(
                report,
                "already complete, no modification watermark to re-check",
                started,
            ));
        }

        let mode = select_write_mode(schema, status.state);
        report.write_mode = Some(mode);
        info!(
            "{}: {} ({}/{} rows in target), writing with {}",
            schema.name,
            status.state.as_str(),
            status.current_rows,
            status.expected_rows,
            mode.as_str()
        );

        let selection = query::build(schema, &status, self.settings.query)?;
        let passes = if self.settings.split_partial_passes {
            selection.into_passes()
        } else {
            vec![selection]
        };

        for pass in &passes {
            self.run_pass(schema, pass, mode, ctx, &mut report).await?;
        }

        if report.rows_fetched == 0 {
            debug!("{}: nothing new to fetch", schema.name);
        }

        report.transition(TablePhase::Done);
        report.duration_seconds = started.elapsed().as_secs_f64();
        let o = &report.outcome;
        info!(
            "{}: done ({} inserted, {} updated, {} skipped, {} failed)",
            schema.name, o.inserted, o.updated, o.skipped, o.failed
        );
        Ok(report)
    }

    /// Tables without identity or modification column are re-read in full
    /// when configured to.
    fn rescans(&self, schema: &TableSchema) -> bool {
        self.settings.query.rescan_unkeyed_tables
            && schema.identity_column().is_none()
            && schema.modification_column().is_none()
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let ddl = if schema.create_sql.trim().is_empty() {
            generate_create_sql(schema)?
        } else {
            schema.create_sql.clone()
        };

        match self.target.execute_ddl(&ddl).await {
            Ok(()) => {
                info!("{}: created target table", schema.name);
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!("{}: target table already exists", schema.name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn run_pass(
        &self,
        schema: &TableSchema,
        selection: &SelectionQuery,
        mode: WriteMode,
        ctx: &RunContext,
        report: &mut TableReport,
    ) -> Result<()> {
        report.transition(TablePhase::Fetching);
        let batch_size = self.settings.batch_size;
        let mut cursor: Option<i64> = None;
        let mut page: u64 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }

            let rows = self
                .source
                .fetch(schema, selection, cursor, page, batch_size)
                .await?;
            if rows.is_empty() {
                return Ok(());
            }
            let fetched = rows.len();

            if let Pagination::Keyset { index, column } = &selection.pagination {
                let last = rows
                    .last()
                    .and_then(|row| row.get(*index))
                    .and_then(SqlValue::as_i64);
                match last {
                    Some(id) => cursor = Some(id),
                    None => {
                        return Err(MigrateError::transfer(
                            &schema.name,
                            format!("identity column '{}' returned a non-integer value", column),
                        ))
                    }
                }
            }

            report.transition(TablePhase::Applying);
            let outcome = self.applier.apply(schema, rows, mode, ctx).await;
            report.outcome.merge(&outcome);
            report.rows_fetched += fetched as u64;
            report.batches += 1;

            let event = ProgressEvent::new(
                &schema.name,
                report.rows_fetched,
                schema.row_count,
                fetched,
            );
            info!("{}", event);
            if let Some(sink) = &ctx.progress {
                let _ = sink.send(event);
            }

            if report.outcome.exceeds_failure_ratio(
                self.settings.max_row_failure_ratio,
                self.settings.min_rows_for_failure_ratio,
            ) {
                return Err(MigrateError::RowFailureThreshold {
                    table: schema.name.clone(),
                    failed: report.outcome.failed,
                    attempted: report.outcome.attempted(),
                });
            }

            report.transition(TablePhase::Fetching);
            page += 1;
        }
    }
}

fn skip(mut report: TableReport, reason: &str, started: Instant) -> TableReport {
    info!("{}: skipped, {}", report.table, reason);
    report.transition(TablePhase::Skipped);
    report.skip_reason = Some(reason.to_string());
    report.duration_seconds = started.elapsed().as_secs_f64();
    report
}
