//! Migration run coordinator.
//!
//! Orders the tables, runs them one after another through the
//! [`TableOrchestrator`], stops at the first table-level failure, and writes
//! the identifier remap on every exit path. Phase runs compare row counts
//! of each finished phase before moving on.

pub mod progress;
pub mod table;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::apply::RunContext;
use crate::catalog::{JsonSchemaCatalog, SchemaSnapshot};
use crate::config::{Config, MigrationConfig};
use crate::core::{SchemaCatalog, SourceSession, TableSchema, TargetSession};
use crate::drivers::mssql::MssqlSource;
use crate::drivers::mysql::MysqlTarget;
use crate::error::{MigrateError, Result};
use crate::verify::{validate_counts, VerifyResult};

pub use progress::{ProgressEvent, ProgressSink};
pub use table::{TableOrchestrator, TablePhase, TableReport, TableSettings};

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed or cancelled.
    pub status: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables scheduled for this run.
    pub tables_total: usize,

    pub tables_done: usize,
    pub tables_skipped: usize,
    pub tables_failed: usize,

    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_skipped: u64,
    pub rows_failed: u64,

    /// Entries written to the identifier remap file.
    pub remap_entries: usize,

    /// Table that stopped the run.
    pub failed_table: Option<String>,

    /// Per-table reports in execution order.
    pub tables: Vec<TableReport>,

    /// Row count checks of the phases that finished, in run order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PhaseCheck>,
}

/// Row counts of a phase's tables, compared right after the phase ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseCheck {
    pub phase: String,
    pub counts: VerifyResult,
}

/// Tables run as one unit. Groups belonging to a phase are verified once
/// all of their tables are done.
struct RunGroup {
    phase: Option<String>,
    tables: Vec<TableSchema>,
}

impl RunGroup {
    fn tables(tables: Vec<TableSchema>) -> Vec<RunGroup> {
        vec![RunGroup {
            phase: None,
            tables,
        }]
    }
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs whole migrations over a catalog, a source and a target.
pub struct Coordinator {
    settings: MigrationConfig,
    catalog: Arc<dyn SchemaCatalog>,
    source: Arc<dyn SourceSession>,
    target: Arc<dyn TargetSession>,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
}

impl Coordinator {
    pub fn new(
        settings: MigrationConfig,
        catalog: Arc<dyn SchemaCatalog>,
        source: Arc<dyn SourceSession>,
        target: Arc<dyn TargetSession>,
    ) -> Self {
        Self {
            settings,
            catalog,
            source,
            target,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Connect to both databases and load the schema snapshot, extracting
    /// it from the source first when the file does not exist yet.
    pub async fn connect(config: &Config) -> Result<Self> {
        let source = MssqlSource::connect(&config.source).await?;
        let target = MysqlTarget::connect(&config.target).await?;

        let schema_file = &config.migration.schema_file;
        let catalog = if schema_file.exists() {
            JsonSchemaCatalog::load(schema_file)?
        } else {
            info!(
                "Schema file {} not found, extracting from source",
                schema_file.display()
            );
            let tables = source
                .extract_schema(&config.migration.modification_column_patterns)
                .await?;
            let snapshot = SchemaSnapshot::new(&config.source.database, tables);
            snapshot.save(schema_file)?;
            JsonSchemaCatalog::from_snapshot(snapshot)
        };

        Ok(Self::new(
            config.migration.clone(),
            Arc::new(catalog),
            Arc::new(source),
            Arc::new(target),
        ))
    }

    /// Stop between pages and tables once the token is cancelled.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Also deliver progress events to `sink`.
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Migrate every selected table, smallest first.
    pub async fn run_all(self) -> Result<MigrationResult> {
        let tables = self.catalog.get_all_schemas().map(|mut tables| {
            tables.retain(|t| self.settings.is_table_selected(&t.name));
            tables.sort_by_key(|t| t.row_count);
            RunGroup::tables(tables)
        });
        self.execute(tables).await
    }

    /// Migrate the named tables in the given order.
    pub async fn run_tables(self, names: &[String]) -> Result<MigrationResult> {
        let tables = self.schemas(names).map(RunGroup::tables);
        self.execute(tables).await
    }

    /// Migrate the tables of a configured phase, then compare their counts.
    pub async fn run_phase(self, name: &str) -> Result<MigrationResult> {
        self.run_phases(&[name.to_string()]).await
    }

    /// Run the named phases in order. Each phase is verified when it
    /// finishes; the first table failure stops the remaining phases.
    pub async fn run_phases(self, names: &[String]) -> Result<MigrationResult> {
        let groups = names
            .iter()
            .map(|name| -> Result<RunGroup> {
                let phase = self
                    .settings
                    .phase(name)
                    .ok_or_else(|| MigrateError::Config(format!("unknown phase '{}'", name)))?;
                info!("Phase '{}': {} tables", phase.name, phase.tables.len());
                Ok(RunGroup {
                    phase: Some(phase.name.clone()),
                    tables: self.schemas(&phase.tables)?,
                })
            })
            .collect::<Result<Vec<_>>>();
        self.execute(groups).await
    }

    /// Run the configured phases in order, stopping before the first phase
    /// marked `manual`.
    pub async fn run_sequential(self) -> Result<MigrationResult> {
        let mut names = Vec::new();
        for phase in &self.settings.phases {
            if phase.manual {
                info!(
                    "Phase '{}' is manual, stopping here. Run it with --phase {}",
                    phase.name, phase.name
                );
                break;
            }
            names.push(phase.name.clone());
        }
        self.run_phases(&names).await
    }

    fn schemas(&self, names: &[String]) -> Result<Vec<TableSchema>> {
        names
            .iter()
            .map(|name| {
                self.catalog
                    .get_schema(name)
                    .map_err(|e| e.for_table(name))
            })
            .collect()
    }

    async fn verify_phase(&self, phase: &str, tables: &[TableSchema]) -> Option<PhaseCheck> {
        let names: Vec<String> = tables.iter().map(|t| t.name.clone()).collect();
        match validate_counts(self.source.as_ref(), self.target.as_ref(), &names).await {
            Ok(counts) => {
                if counts.is_in_sync() {
                    info!("Phase '{}': all {} tables in sync", phase, counts.tables_in_sync);
                } else {
                    warn!(
                        "Phase '{}': {} tables with row count differences",
                        phase, counts.tables_with_differences
                    );
                }
                Some(PhaseCheck {
                    phase: phase.to_string(),
                    counts,
                })
            }
            Err(e) => {
                warn!("Phase '{}': verification failed: {}", phase, e);
                None
            }
        }
    }

    async fn execute(self, groups: Result<Vec<RunGroup>>) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let ctx = RunContext::new(self.cancel.clone(), self.progress.clone());
        info!("Starting migration run: {}", ctx.run_id);

        let mut reports = Vec::new();
        let mut checks = Vec::new();
        let mut failure: Option<(Option<String>, MigrateError)> = None;
        let mut tables_total = 0;

        match groups {
            Ok(groups) => {
                tables_total = groups.iter().map(|g| g.tables.len()).sum();
                info!("Found {} tables to migrate", tables_total);
                let orchestrator = TableOrchestrator::new(
                    Arc::clone(&self.source),
                    Arc::clone(&self.target),
                    TableSettings::from(&self.settings),
                    self.settings.apply_concurrency,
                );

                'groups: for group in &groups {
                    for schema in &group.tables {
                        if ctx.cancel.is_cancelled() {
                            info!("Cancellation requested, stopping before {}", schema.name);
                            failure = Some((None, MigrateError::Cancelled));
                            break 'groups;
                        }
                        match orchestrator.run(schema, &ctx).await {
                            Ok(report) => reports.push(report),
                            Err(e) => {
                                let e = e.for_table(&schema.name);
                                error!("{}: failed - {}", schema.name, e);
                                reports.push(TableReport::failed(&schema.name, &e));
                                failure = Some((Some(schema.name.clone()), e));
                                break 'groups;
                            }
                        }
                    }
                    if let Some(phase) = &group.phase {
                        checks.extend(self.verify_phase(phase, &group.tables).await);
                    }
                }
            }
            Err(e) => {
                error!("Cannot start migration: {}", e);
                failure = Some((None, e));
            }
        }

        if let Err(e) = ctx.remap.save(&self.settings.remap_file) {
            warn!(
                "Failed to write identifier remap to {}: {}",
                self.settings.remap_file.display(),
                e
            );
        }

        self.source.close().await;
        self.target.close().await;

        let completed_at = Utc::now();
        let status = match &failure {
            None => "completed",
            Some((_, MigrateError::Cancelled)) => "cancelled",
            Some(_) => "failed",
        };
        let mut result = summarize(
            &ctx,
            status,
            started_at,
            completed_at,
            tables_total,
            reports,
            failure.as_ref().and_then(|(t, _)| t.clone()),
        );
        result.phases = checks;

        info!(
            "Migration {}: {} tables ({} done, {} skipped, {} failed), {} rows inserted, {} updated, {} skipped, {} failed, {} remap entries written in {:.1}s",
            result.status,
            result.tables_total,
            result.tables_done,
            result.tables_skipped,
            result.tables_failed,
            result.rows_inserted,
            result.rows_updated,
            result.rows_skipped,
            result.rows_failed,
            result.remap_entries,
            result.duration_seconds
        );

        match failure {
            Some((_, e)) => Err(e),
            None => Ok(result),
        }
    }
}

fn summarize(
    ctx: &RunContext,
    status: &str,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    tables_total: usize,
    reports: Vec<TableReport>,
    failed_table: Option<String>,
) -> MigrationResult {
    let count = |phase: TablePhase| reports.iter().filter(|r| r.phase == phase).count();
    let sum = |f: fn(&TableReport) -> u64| reports.iter().map(f).sum::<u64>();

    MigrationResult {
        run_id: ctx.run_id.to_string(),
        status: status.to_string(),
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
        tables_total,
        tables_done: count(TablePhase::Done),
        tables_skipped: count(TablePhase::Skipped),
        tables_failed: count(TablePhase::Failed),
        rows_inserted: sum(|r| r.outcome.inserted),
        rows_updated: sum(|r| r.outcome.updated),
        rows_skipped: sum(|r| r.outcome.skipped),
        rows_failed: sum(|r| r.outcome.failed),
        remap_entries: ctx.remap.len(),
        failed_table,
        tables: reports,
        phases: Vec::new(),
    }
}
