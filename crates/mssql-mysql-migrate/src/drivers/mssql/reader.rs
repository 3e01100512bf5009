//! MSSQL source session.
//!
//! Tiberius connections pooled by bb8. Pages are read with the T-SQL
//! rendered by [`SelectionQuery::page_sql`] and decoded column by column
//! according to the schema's declared types.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, FromSql, Row as TdsRow};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SourceConfig;
use crate::core::identifier::qualify_mssql;
use crate::core::{Row, SourceSession, SqlValue, TableSchema};
use crate::error::{MigrateError, Result};
use crate::query::SelectionQuery;

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub(super) type MssqlClient = Client<Compat<TcpStream>>;

/// bb8 connection manager for Tiberius clients.
#[derive(Clone)]
pub(super) struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "connecting"))?;
        tcp.set_nodelay(true).ok();

        // Keepalives stop idle pooled connections from being dropped by firewalls.
        let std_tcp = tcp.into_std().map_err(|e| io_error(e, "detaching socket"))?;
        let socket = socket2::Socket::from(std_tcp);
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(TCP_KEEPALIVE_INTERVAL)
            .with_interval(TCP_KEEPALIVE_INTERVAL);
        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
        }
        let std_tcp: std::net::TcpStream = socket.into();
        std_tcp.set_nonblocking(true).ok();
        let tcp = TcpStream::from_std(std_tcp).map_err(|e| io_error(e, "converting socket"))?;

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Pooled MSSQL source.
pub struct MssqlSource {
    pool: Pool<TiberiusConnectionManager>,
    schema: String,
}

impl MssqlSource {
    /// Build the pool and check that a connection can be made.
    pub async fn connect(config: &SourceConfig) -> Result<Self> {
        let manager = TiberiusConnectionManager {
            config: config.clone(),
        };
        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MSSQL connection pool"))?;

        let source = Self {
            pool,
            schema: config.schema.clone(),
        };
        source.test_connection().await?;

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, config.max_connections
        );
        Ok(source)
    }

    /// Source schema name tables are read from.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Run `SELECT @@VERSION` and return the server version string.
    pub async fn test_connection(&self) -> Result<String> {
        let mut client = self.get_client().await?;
        let row = client
            .simple_query("SELECT @@VERSION")
            .await?
            .into_row()
            .await?;
        Ok(row
            .and_then(|r| r.try_get::<&str, _>(0).ok().flatten().map(str::to_string))
            .unwrap_or_default())
    }

    pub(super) async fn get_client(
        &self,
    ) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "getting MSSQL connection from pool"))
    }
}

#[async_trait]
impl SourceSession for MssqlSource {
    async fn fetch(
        &self,
        schema: &TableSchema,
        query: &SelectionQuery,
        cursor: Option<i64>,
        page: u64,
        batch_size: usize,
    ) -> Result<Vec<Row>> {
        let sql = query.page_sql(&self.schema, cursor, page, batch_size)?;
        debug!("{}: {}", schema.name, sql);

        let mut client = self.get_client().await?;
        let rows = client.simple_query(sql).await?.into_first_result().await?;

        rows.iter()
            .map(|row| {
                schema
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| convert_row_value(row, idx, &col.data_type))
                    .collect::<Result<Row>>()
            })
            .collect()
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {} WITH (NOLOCK)",
            qualify_mssql(&self.schema, table)?
        );
        let mut client = self.get_client().await?;
        let row = client.simple_query(sql).await?.into_row().await?;
        Ok(row
            .map(|r| r.try_get::<i64, _>(0))
            .transpose()?
            .flatten()
            .unwrap_or(0))
    }

    async fn close(&self) {
        // bb8 has no explicit shutdown; connections close when the pool drops.
        debug!(
            "Closing MSSQL source ({} connections open)",
            self.pool.state().connections
        );
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a TdsRow, idx: usize) -> Result<Option<T>> {
    Ok(row.try_get::<T, _>(idx)?)
}

/// Decode one column according to its declared SQL Server type.
fn convert_row_value(row: &TdsRow, idx: usize, data_type: &str) -> Result<SqlValue> {
    let value = match data_type.to_lowercase().as_str() {
        "bit" => get::<bool>(row, idx)?.into(),
        "tinyint" => get::<u8>(row, idx)?.map_or(SqlValue::Null, |v| SqlValue::I16(i16::from(v))),
        "smallint" => get::<i16>(row, idx)?.map_or(SqlValue::Null, SqlValue::I16),
        "int" => get::<i32>(row, idx)?.into(),
        "bigint" => get::<i64>(row, idx)?.into(),
        "real" => get::<f32>(row, idx)?.map_or(SqlValue::Null, SqlValue::F32),
        // Tiberius decodes money as a float
        "float" | "money" | "smallmoney" => {
            get::<f64>(row, idx)?.map_or(SqlValue::Null, SqlValue::F64)
        }
        "decimal" | "numeric" => {
            get::<Decimal>(row, idx)?.map_or(SqlValue::Null, SqlValue::Decimal)
        }
        "uniqueidentifier" => get::<Uuid>(row, idx)?.map_or(SqlValue::Null, SqlValue::Uuid),
        "datetime" | "datetime2" | "smalldatetime" => get::<NaiveDateTime>(row, idx)?.into(),
        "datetimeoffset" => get::<DateTime<FixedOffset>>(row, idx)?
            .map_or(SqlValue::Null, SqlValue::DateTimeOffset),
        "date" => get::<NaiveDate>(row, idx)?.map_or(SqlValue::Null, SqlValue::Date),
        "time" => get::<NaiveTime>(row, idx)?.map_or(SqlValue::Null, SqlValue::Time),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => {
            get::<&[u8]>(row, idx)?.map_or(SqlValue::Null, |b| SqlValue::Bytes(b.to_vec()))
        }
        // Character types, plus xml, CLR and sql_variant columns that the
        // selection casts to NVARCHAR(MAX)
        _ => get::<&str>(row, idx)?.into(),
    };
    Ok(value)
}
