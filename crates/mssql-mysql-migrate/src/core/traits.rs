//! Seams between the migration engine and the databases it talks to.
//!
//! - [`SchemaCatalog`]: table metadata captured at extraction time
//! - [`SourceSession`]: paged reads from the source database
//! - [`TargetSession`]: row counts, watermarks, DDL and row writes on the target
//!
//! The engine only ever sees these traits, so the same table state machine
//! runs against the real drivers and against in-memory fakes in tests.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::query::SelectionQuery;

use super::schema::TableSchema;
use super::value::{Row, SqlValue};

/// Lookup of table schemas by name.
pub trait SchemaCatalog: Send + Sync {
    /// Schema of one table. A miss is a `SchemaCatalog` error.
    fn get_schema(&self, name: &str) -> Result<TableSchema>;

    /// Every known table, in catalog order.
    fn get_all_schemas(&self) -> Result<Vec<TableSchema>>;
}

/// Paged reads from the source database.
#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Fetch one page of rows selected by `query`.
    ///
    /// `cursor` is the last identity value seen for keyset pagination,
    /// `page` the zero-based page number for offset pagination. Rows come
    /// back with values in `schema.columns` order.
    async fn fetch(
        &self,
        schema: &TableSchema,
        query: &SelectionQuery,
        cursor: Option<i64>,
        page: u64,
        batch_size: usize,
    ) -> Result<Vec<Row>>;

    /// Exact row count of a source table.
    async fn row_count(&self, table: &str) -> Result<i64>;

    /// Release pooled connections.
    async fn close(&self);
}

/// Writes and state queries against the target database.
#[async_trait]
pub trait TargetSession: Send + Sync {
    /// Row count of a target table, or `None` when the table does not exist.
    async fn row_count(&self, table: &str) -> Result<Option<i64>>;

    /// `MAX(column)` of an integer column. `None` on an empty table.
    async fn max_identity(&self, table: &str, column: &str) -> Result<Option<i64>>;

    /// `MAX(column)` of a date/time column. `None` on an empty table or
    /// when every value is NULL.
    async fn max_timestamp(&self, table: &str, column: &str)
        -> Result<Option<NaiveDateTime>>;

    /// Run a DDL statement.
    async fn execute_ddl(&self, sql: &str) -> Result<()>;

    /// Write a single row.
    ///
    /// `values` are already transcoded and line up with `columns`.
    /// `identity` names the identity column, which `Upsert` leaves out of
    /// the update list.
    async fn write_row(
        &self,
        table: &str,
        columns: &[&str],
        values: &[SqlValue],
        mode: WriteMode,
        identity: Option<&str>,
    ) -> Result<WriteResult>;

    /// Release pooled connections.
    async fn close(&self);
}

/// How rows of one table invocation are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Plain INSERT. A duplicate-key error means the row is already there.
    Insert,

    /// `INSERT IGNORE`. Zero affected rows means the row is already there.
    InsertIgnore,

    /// `INSERT ... ON DUPLICATE KEY UPDATE` on every non-identity column.
    Upsert,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Insert => "insert",
            WriteMode::InsertIgnore => "insert_ignore",
            WriteMode::Upsert => "upsert",
        }
    }
}

/// Target-reported outcome of one row write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Rows affected as reported by the server. For an upsert MySQL reports
    /// 1 for an insert, 2 for an update and 0 when nothing changed.
    pub rows_affected: u64,

    /// Auto-increment value assigned by the target, if any.
    pub inserted_id: Option<i64>,

    /// The row existed and was updated.
    pub was_update: bool,
}

impl WriteResult {
    pub fn inserted(inserted_id: Option<i64>) -> Self {
        Self {
            rows_affected: 1,
            inserted_id,
            was_update: false,
        }
    }

    pub fn updated() -> Self {
        Self {
            rows_affected: 2,
            inserted_id: None,
            was_update: true,
        }
    }

    pub fn unchanged() -> Self {
        Self::default()
    }
}
