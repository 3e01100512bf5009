//! MySQL/MariaDB target session.
//!
//! Uses mysql_async for connection pooling. Rows are written one statement
//! at a time so that every row succeeds or fails on its own.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, SslOpts};
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::core::identifier::{quote_list, quote_mysql};
use crate::core::{SqlValue, TargetSession, WriteMode, WriteResult};
use crate::error::{MigrateError, Result};
use crate::typemap::{format_timestamp, TIMESTAMP_FORMAT};

/// MySQL target session using mysql_async.
pub struct MysqlTarget {
    pool: Pool,
}

impl MysqlTarget {
    /// Create the pool from configuration and check that it can connect.
    pub async fn connect(config: &TargetConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "prefer" | "require" => {
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
            _ => Some(SslOpts::default()),
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);

        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let max_conns = (config.max_connections as usize).max(1);
        let constraints = PoolConstraints::new(1, max_conns).unwrap_or_default();
        let pool_opts = PoolOpts::new().with_constraints(constraints);

        let opts: Opts = builder.pool_opts(pool_opts).into();
        let target = Self {
            pool: Pool::new(opts),
        };
        target.test_connection().await?;

        info!(
            "Connected to MySQL target: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_conns
        );
        Ok(target)
    }

    /// Test the database connection.
    pub async fn test_connection(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        conn.query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL connection"))?;
        Ok(())
    }

    async fn get_conn(&self) -> Result<Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MySQL connection"))
    }

    async fn table_exists(&self, conn: &mut Conn, table: &str) -> Result<bool> {
        let sql = r#"
            SELECT COUNT(*) FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        "#;
        let count: Option<i64> = conn.exec_first(sql, (table,)).await?;
        Ok(count.unwrap_or(0) > 0)
    }
}

#[async_trait]
impl TargetSession for MysqlTarget {
    async fn row_count(&self, table: &str) -> Result<Option<i64>> {
        let mut conn = self.get_conn().await?;
        if !self.table_exists(&mut conn, table).await? {
            return Ok(None);
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_mysql(table)?);
        let count: Option<i64> = conn.query_first(sql).await?;
        Ok(Some(count.unwrap_or(0)))
    }

    async fn max_identity(&self, table: &str, column: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT CAST(MAX({}) AS SIGNED) FROM {}",
            quote_mysql(column)?,
            quote_mysql(table)?
        );
        let mut conn = self.get_conn().await?;
        let max: Option<Option<i64>> = conn.query_first(sql).await?;
        Ok(max.flatten())
    }

    async fn max_timestamp(&self, table: &str, column: &str) -> Result<Option<NaiveDateTime>> {
        let sql = format!(
            "SELECT DATE_FORMAT(MAX({}), '%Y-%m-%d %H:%i:%s') FROM {}",
            quote_mysql(column)?,
            quote_mysql(table)?
        );
        let mut conn = self.get_conn().await?;
        let max: Option<Option<String>> = conn.query_first(sql).await?;
        max.flatten()
            .map(|s| {
                NaiveDateTime::parse_from_str(&s, TIMESTAMP_FORMAT).map_err(|e| {
                    MigrateError::transfer(table, format!("unreadable MAX({}) '{}': {}", column, s, e))
                })
            })
            .transpose()
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        debug!("Executing DDL: {}", sql);
        let mut conn = self.get_conn().await?;
        conn.query_drop(sql).await?;
        Ok(())
    }

    async fn write_row(
        &self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
        mode: WriteMode,
        identity: Option<&str>,
    ) -> Result<WriteResult> {
        let sql = write_sql(table, columns, mode, identity)?;
        let params: Vec<mysql_async::Value> = values.iter().map(sql_value_to_mysql).collect();

        let mut conn = self.get_conn().await?;
        conn.exec_drop(sql, params).await?;

        // ON DUPLICATE KEY UPDATE reports 1 for an insert, 2 for a changed
        // row and 0 for an identical one.
        let affected = conn.affected_rows();
        let result = match affected {
            0 => WriteResult::unchanged(),
            2 if mode == WriteMode::Upsert => WriteResult::updated(),
            _ => WriteResult::inserted(
                conn.last_insert_id()
                    .and_then(|id| i64::try_from(id).ok())
                    .filter(|&id| id != 0),
            ),
        };
        Ok(result)
    }

    async fn close(&self) {
        if let Err(e) = self.pool.clone().disconnect().await {
            warn!("Error closing MySQL pool: {}", e);
        }
    }
}

/// Render the single-row statement for `mode`.
fn write_sql(
    table: &str,
    columns: &[&str],
    mode: WriteMode,
    identity: Option<&str>,
) -> Result<String> {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let insert = |verb: &str| -> Result<String> {
        Ok(format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            quote_mysql(table)?,
            quote_list(columns, quote_mysql)?,
            placeholders
        ))
    };

    match mode {
        WriteMode::Insert => insert("INSERT"),
        WriteMode::InsertIgnore => insert("INSERT IGNORE"),
        WriteMode::Upsert => {
            let updates = columns
                .iter()
                .filter(|c| Some(**c) != identity)
                .map(|c| quote_mysql(c).map(|q| format!("{q} = VALUES({q})")))
                .collect::<Result<Vec<_>>>()?;
            if updates.is_empty() {
                // Identity-only table: nothing to update
                return insert("INSERT IGNORE");
            }
            Ok(format!(
                "{} ON DUPLICATE KEY UPDATE {}",
                insert("INSERT")?,
                updates.join(", ")
            ))
        }
    }
}

/// Convert SqlValue to a mysql_async parameter.
///
/// Temporal values are sent as `YYYY-MM-DD HH:MM:SS` text, which MySQL
/// coerces into DATETIME/DATE/TIME columns.
fn sql_value_to_mysql(value: &SqlValue) -> mysql_async::Value {
    match value {
        SqlValue::Null => mysql_async::Value::NULL,
        SqlValue::Bool(b) => mysql_async::Value::from(*b),
        SqlValue::I16(i) => mysql_async::Value::from(*i),
        SqlValue::I32(i) => mysql_async::Value::from(*i),
        SqlValue::I64(i) => mysql_async::Value::from(*i),
        SqlValue::F32(f) => mysql_async::Value::from(*f),
        SqlValue::F64(f) => mysql_async::Value::from(*f),
        SqlValue::Text(s) => mysql_async::Value::from(s.as_str()),
        SqlValue::Bytes(b) => mysql_async::Value::from(b.as_slice()),
        SqlValue::Uuid(u) => mysql_async::Value::from(u.to_string()),
        SqlValue::Decimal(d) => mysql_async::Value::from(d.to_string()),
        SqlValue::DateTime(dt) => mysql_async::Value::from(format_timestamp(dt)),
        SqlValue::DateTimeOffset(dto) => {
            mysql_async::Value::from(format_timestamp(&dto.naive_local()))
        }
        SqlValue::Date(d) => mysql_async::Value::from(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => mysql_async::Value::from(t.format("%H:%M:%S%.f").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_write_sql_insert_modes() {
        let cols = ["Id", "Name"];
        assert_eq!(
            write_sql("Accounts", &cols, WriteMode::Insert, Some("Id")).unwrap(),
            "INSERT INTO `Accounts` (`Id`, `Name`) VALUES (?, ?)"
        );
        assert_eq!(
            write_sql("Accounts", &cols, WriteMode::InsertIgnore, Some("Id")).unwrap(),
            "INSERT IGNORE INTO `Accounts` (`Id`, `Name`) VALUES (?, ?)"
        );
    }

    #[test]
    fn test_write_sql_upsert_skips_identity() {
        let cols = ["Id", "Name", "UpdatedAt"];
        assert_eq!(
            write_sql("Accounts", &cols, WriteMode::Upsert, Some("Id")).unwrap(),
            "INSERT INTO `Accounts` (`Id`, `Name`, `UpdatedAt`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `Name` = VALUES(`Name`), `UpdatedAt` = VALUES(`UpdatedAt`)"
        );
    }

    #[test]
    fn test_write_sql_upsert_identity_only() {
        assert_eq!(
            write_sql("Keys", &["Id"], WriteMode::Upsert, Some("Id")).unwrap(),
            "INSERT IGNORE INTO `Keys` (`Id`) VALUES (?)"
        );
    }

    #[test]
    fn test_write_sql_rejects_bad_identifier() {
        assert!(write_sql("", &["Id"], WriteMode::Insert, None).is_err());
        assert!(write_sql("T", &["a\0b"], WriteMode::Insert, None).is_err());
    }

    #[test]
    fn test_sql_value_to_mysql_temporal_as_text() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        assert_eq!(
            sql_value_to_mysql(&SqlValue::DateTime(dt)),
            mysql_async::Value::from("2024-03-01 08:30:00")
        );
        assert_eq!(
            sql_value_to_mysql(&SqlValue::Null),
            mysql_async::Value::NULL
        );
        assert_eq!(
            sql_value_to_mysql(&SqlValue::I32(7)),
            mysql_async::Value::Int(7)
        );
    }
}
