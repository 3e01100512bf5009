//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    match config.target.ssl_mode.to_lowercase().as_str() {
        "disable" | "prefer" | "require" | "verify_ca" | "verify-ca" | "verify_identity"
        | "verify-full" => {}
        other => {
            return Err(MigrateError::Config(format!(
                "target.ssl_mode '{}' is not one of disable, prefer, require, verify_ca, verify_identity",
                other
            )))
        }
    }

    // Cannot migrate to the same database
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.apply_concurrency == 0 {
        return Err(MigrateError::Config(
            "migration.apply_concurrency must be at least 1".into(),
        ));
    }
    if let Some(ratio) = migration.max_row_failure_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(MigrateError::Config(format!(
                "migration.max_row_failure_ratio must be between 0 and 1, got {}",
                ratio
            )));
        }
    }

    let mut seen = HashSet::new();
    for phase in &migration.phases {
        if phase.tables.is_empty() {
            return Err(MigrateError::Config(format!(
                "phase '{}' lists no tables",
                phase.name
            )));
        }
        if !seen.insert(phase.name.to_lowercase()) {
            return Err(MigrateError::Config(format!(
                "phase '{}' is defined more than once",
                phase.name
            )));
        }
    }

    Ok(())
}
