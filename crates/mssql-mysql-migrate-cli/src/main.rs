//! mssql-mysql-migrate CLI - resumable MSSQL to MySQL migration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use mssql_mysql_migrate::{
    validate_counts, Config, Coordinator, JsonSchemaCatalog, MigrateError, MigrationResult,
    MssqlSource, MysqlTarget, SchemaCatalog, SchemaSnapshot, SourceSession, TargetSession,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-mysql-migrate")]
#[command(about = "Resumable, incremental MSSQL to MySQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error (RUST_LOG overrides)
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test database connections
    HealthCheck,

    /// Extract the source schema into the snapshot file
    ExtractSchema,

    /// Migrate tables, resuming from what the target already holds
    Run {
        /// Only these tables, in this order (comma-separated)
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["phase", "all_phases"])]
        tables: Vec<String>,

        /// Only the tables of these configured phases, run in this order and
        /// verified after each phase (comma-separated)
        #[arg(long, value_delimiter = ',', conflicts_with = "all_phases")]
        phase: Vec<String>,

        /// Run every configured phase in order, stopping before a manual one
        #[arg(long)]
        all_phases: bool,
    },

    /// List the configured phases
    Phases,

    /// Validate row counts between source and target
    Validate {
        /// Only these tables (comma-separated); default is every snapshot table
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::HealthCheck => health_check(&config, cli.output_json).await,

        Commands::ExtractSchema => {
            let source = MssqlSource::connect(&config.source).await?;
            let tables = source
                .extract_schema(&config.migration.modification_column_patterns)
                .await?;
            source.close().await;

            let snapshot = SchemaSnapshot::new(&config.source.database, tables);
            snapshot.save(&config.migration.schema_file)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!(
                    "Extracted {} tables to {}",
                    snapshot.tables.len(),
                    config.migration.schema_file.display()
                );
                for table in &snapshot.tables {
                    println!("  {:<40} {:>12} rows", table.name, table.row_count);
                }
            }
            Ok(())
        }

        Commands::Run {
            tables,
            phase,
            all_phases,
        } => {
            let cancel_token = setup_signal_handler();
            let mut coordinator = Coordinator::connect(&config)
                .await?
                .with_cancellation(cancel_token);

            let progress_task = if cli.progress {
                let (tx, mut rx) = mpsc::unbounded_channel();
                coordinator = coordinator.with_progress(tx);
                Some(tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                    }
                }))
            } else {
                None
            };

            let result = if all_phases {
                coordinator.run_sequential().await
            } else if !phase.is_empty() {
                coordinator.run_phases(&phase).await
            } else if !tables.is_empty() {
                coordinator.run_tables(&tables).await
            } else {
                coordinator.run_all().await
            };

            // The coordinator dropped its sender, so the task drains and ends.
            if let Some(task) = progress_task {
                let _ = task.await;
            }

            print_result(&result?, cli.output_json)
        }

        Commands::Phases => {
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&config.migration.phases)?);
                return Ok(());
            }
            if config.migration.phases.is_empty() {
                println!("No phases configured");
            }
            for phase in &config.migration.phases {
                let manual = if phase.manual { " (manual)" } else { "" };
                println!("{}: {}{}", phase.name, phase.description, manual);
                for table in &phase.tables {
                    println!("  - {}", table);
                }
            }
            Ok(())
        }

        Commands::Validate { tables } => validate(&config, tables, cli.output_json).await,
    }
}

async fn health_check(config: &Config, output_json: bool) -> Result<(), MigrateError> {
    let start = Instant::now();
    // connect() runs a test query before returning
    let source = MssqlSource::connect(&config.source).await;
    let source_latency_ms = start.elapsed().as_millis() as u64;

    let start = Instant::now();
    let target = MysqlTarget::connect(&config.target).await;
    let target_latency_ms = start.elapsed().as_millis() as u64;

    let source_error = source.as_ref().err().map(|e| e.to_string());
    let target_error = target.as_ref().err().map(|e| e.to_string());
    let healthy = source_error.is_none() && target_error.is_none();

    if let Ok(source) = &source {
        source.close().await;
    }
    if let Ok(target) = &target {
        target.close().await;
    }

    if output_json {
        let result = serde_json::json!({
            "healthy": healthy,
            "source_connected": source_error.is_none(),
            "source_latency_ms": source_latency_ms,
            "source_error": source_error,
            "target_connected": target_error.is_none(),
            "target_latency_ms": target_latency_ms,
            "target_error": target_error,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Health Check Results:");
        println!(
            "  Source (MSSQL): {} ({}ms)",
            if source_error.is_none() { "OK" } else { "FAILED" },
            source_latency_ms
        );
        if let Some(ref err) = source_error {
            println!("    Error: {}", err);
        }
        println!(
            "  Target (MySQL): {} ({}ms)",
            if target_error.is_none() { "OK" } else { "FAILED" },
            target_latency_ms
        );
        if let Some(ref err) = target_error {
            println!("    Error: {}", err);
        }
        println!(
            "\n  Overall: {}",
            if healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    if !healthy {
        return Err(MigrateError::Config("Health check failed".to_string()));
    }
    Ok(())
}

async fn validate(
    config: &Config,
    mut tables: Vec<String>,
    output_json: bool,
) -> Result<(), MigrateError> {
    let source = MssqlSource::connect(&config.source).await?;
    let target = MysqlTarget::connect(&config.target).await?;

    if tables.is_empty() {
        let schema_file = &config.migration.schema_file;
        let schemas = if schema_file.exists() {
            JsonSchemaCatalog::load(schema_file)?.get_all_schemas()?
        } else {
            warn!(
                "Schema file {} not found, listing tables from source",
                schema_file.display()
            );
            source
                .extract_schema(&config.migration.modification_column_patterns)
                .await?
        };
        tables = schemas
            .into_iter()
            .map(|t| t.name)
            .filter(|name| config.migration.is_table_selected(name))
            .collect();
    }

    let result = validate_counts(&source, &target, &tables).await;
    source.close().await;
    target.close().await;
    let result = result?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Row count validation:");
    for check in &result.tables {
        let target_rows = check
            .target_rows
            .map_or_else(|| "missing".to_string(), |n| n.to_string());
        println!(
            "  {} {:<40} source={:>12} target={:>12}",
            if check.is_in_sync() { "OK  " } else { "DIFF" },
            check.table,
            check.source_rows,
            target_rows
        );
    }
    println!(
        "\n  {} in sync, {} with differences ({:.2}s)",
        result.tables_in_sync,
        result.tables_with_differences,
        result.duration_ms as f64 / 1000.0
    );
    Ok(())
}

fn print_result(result: &MigrationResult, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    println!("\nMigration completed!");
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {} done, {} skipped, {} total",
        result.tables_done, result.tables_skipped, result.tables_total
    );
    println!(
        "  Rows: {} inserted, {} updated, {} skipped, {} failed",
        result.rows_inserted, result.rows_updated, result.rows_skipped, result.rows_failed
    );
    if result.remap_entries > 0 {
        println!("  Remapped identifiers: {}", result.remap_entries);
    }
    for check in &result.phases {
        println!(
            "  Phase {}: {} in sync, {} with differences",
            check.phase, check.counts.tables_in_sync, check.counts.tables_with_differences
        );
        for table in check.counts.tables.iter().filter(|t| !t.is_in_sync()) {
            println!("    {}: {} rows missing", table.table, table.missing());
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM. The returned token is cancelled
/// when either arrives; the run stops at the next page boundary.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current batch...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to setup {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
            token.cancel();
        }
    });

    cancel_token
}
