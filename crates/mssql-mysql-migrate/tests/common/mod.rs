//! In-memory source and target sessions for engine tests.
//!
//! The source interprets a [`SelectionQuery`] the way the T-SQL rendering
//! does. The target behaves like a MySQL table with a primary key:
//! duplicate-key errors, `INSERT IGNORE`, `ON DUPLICATE KEY UPDATE`
//! affected-row counts and auto-increment on identity value 0.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};

use mssql_mysql_migrate::query::{Filter, ModifiedPredicate, Pagination, SelectionQuery};
use mssql_mysql_migrate::typemap::{transcode, TIMESTAMP_FORMAT};
use mssql_mysql_migrate::{
    ColumnSpec, Coordinator, JsonSchemaCatalog, MigrateError, MigrationConfig, Result, Row,
    SourceSession, SqlValue, TableSchema, TargetSession, WriteMode, WriteResult,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// `Accounts(Id int identity PK, Name nvarchar(100), UpdatedAt datetime2, Active bit)`.
pub fn accounts_schema(row_count: i64) -> TableSchema {
    let mut id = ColumnSpec::new("Id", "int");
    id.is_identity = true;
    id.is_primary_key = true;
    id.is_nullable = false;

    let mut name = ColumnSpec::new("Name", "nvarchar");
    name.max_length = 200;

    let mut updated = ColumnSpec::new("UpdatedAt", "datetime2");
    updated.is_modification_timestamp = true;

    TableSchema {
        name: "Accounts".into(),
        row_count,
        columns: vec![id, name, updated, ColumnSpec::new("Active", "bit")],
        create_sql: String::new(),
    }
}

/// Row `id` of Accounts, modified `id` minutes after [`base_time`].
pub fn account_row(id: i64) -> Row {
    vec![
        SqlValue::I32(id as i32),
        SqlValue::Text(format!("account-{}", id)),
        SqlValue::DateTime(base_time() + Duration::minutes(id)),
        SqlValue::Bool(id % 2 == 0),
    ]
}

pub fn account_rows(ids: impl IntoIterator<Item = i64>) -> Vec<Row> {
    ids.into_iter().map(account_row).collect()
}

/// Same shape as Accounts under another name.
pub fn orders_schema(row_count: i64) -> TableSchema {
    TableSchema {
        name: "Orders".into(),
        ..accounts_schema(row_count)
    }
}

/// `Settings(Key nvarchar PK, Value nvarchar)`: no identity, no modification column.
pub fn settings_schema(row_count: i64) -> TableSchema {
    let mut key = ColumnSpec::new("Key", "nvarchar");
    key.max_length = 100;
    key.is_primary_key = true;
    key.is_nullable = false;

    TableSchema {
        name: "Settings".into(),
        row_count,
        columns: vec![key, ColumnSpec::new("Value", "nvarchar")],
        create_sql: String::new(),
    }
}

pub fn settings_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            vec![
                SqlValue::Text(format!("setting.{:02}", i)),
                SqlValue::Text(format!("value-{}", i)),
            ]
        })
        .collect()
}

/// `Events(Code nvarchar PK, UpdatedAt datetime2, Payload nvarchar)`:
/// modification column but no identity.
pub fn events_schema(row_count: i64) -> TableSchema {
    let mut code = ColumnSpec::new("Code", "nvarchar");
    code.max_length = 40;
    code.is_primary_key = true;
    code.is_nullable = false;

    let mut updated = ColumnSpec::new("UpdatedAt", "datetime2");
    updated.is_modification_timestamp = true;

    TableSchema {
        name: "Events".into(),
        row_count,
        columns: vec![code, updated, ColumnSpec::new("Payload", "nvarchar")],
        create_sql: String::new(),
    }
}

/// Events stamped by one bulk load: every row carries [`base_time`].
pub fn bulk_event_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| {
            vec![
                SqlValue::Text(format!("EV-{:03}", i)),
                SqlValue::DateTime(base_time()),
                SqlValue::Text(format!("payload-{}", i)),
            ]
        })
        .collect()
}

/// Settings with test-friendly paths under `dir`.
pub fn settings(dir: &Path) -> MigrationConfig {
    MigrationConfig {
        remap_file: dir.join("id-mappings.json"),
        schema_file: dir.join("schema.json"),
        ..MigrationConfig::default()
    }
}

pub fn coordinator(
    settings: MigrationConfig,
    tables: Vec<TableSchema>,
    source: &Arc<MemorySource>,
    target: &Arc<MemoryTarget>,
) -> Coordinator {
    Coordinator::new(
        settings,
        Arc::new(JsonSchemaCatalog::from_tables(tables)),
        Arc::clone(source) as Arc<dyn SourceSession>,
        Arc::clone(target) as Arc<dyn TargetSession>,
    )
}

pub fn read_remap(path: &PathBuf) -> BTreeMap<String, i64> {
    let content = std::fs::read_to_string(path).expect("remap file written");
    serde_json::from_str(&content).expect("remap file is JSON")
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

/// Source tables keyed by name, rows in schema column order.
#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<BTreeMap<String, Vec<Row>>>,
    pages: Mutex<Vec<(String, usize)>>,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Replace the row whose first column equals `id`.
    pub fn update(&self, table: &str, id: i64, row: Row) {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables.get_mut(table).expect("table exists");
        let existing = rows
            .iter_mut()
            .find(|r| r[0].as_i64() == Some(id))
            .expect("row exists");
        *existing = row;
    }

    /// Sizes of the non-empty pages returned for `table`, in order.
    pub fn page_sizes(&self, table: &str) -> Vec<usize> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, n)| t == table && *n > 0)
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn rows_fetched(&self, table: &str) -> usize {
        self.page_sizes(table).iter().sum()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn column_index(schema: &TableSchema, name: &str) -> usize {
    schema
        .columns
        .iter()
        .position(|c| c.name == name)
        .expect("query references a schema column")
}

fn matches(schema: &TableSchema, filter: &Filter, row: &Row) -> bool {
    let id_after = |column: &str, after: i64| {
        row[column_index(schema, column)]
            .as_i64()
            .is_some_and(|v| v > after)
    };
    let modified_after = |p: &ModifiedPredicate| {
        row[column_index(schema, &p.column)]
            .as_naive_datetime()
            .is_some_and(|v| p.matches(v))
    };
    match filter {
        Filter::IdAfter(p) => id_after(&p.column, p.after),
        Filter::ModifiedAfter(p) => modified_after(p),
        Filter::Either(id, m) => id_after(&id.column, id.after) || modified_after(m),
    }
}

fn sort_key(value: &SqlValue) -> (Option<i64>, Option<NaiveDateTime>, String) {
    let text = match value {
        SqlValue::Text(s) => s.clone(),
        _ => String::new(),
    };
    (value.as_i64(), value.as_naive_datetime(), text)
}

#[async_trait]
impl SourceSession for MemorySource {
    async fn fetch(
        &self,
        schema: &TableSchema,
        query: &SelectionQuery,
        cursor: Option<i64>,
        page: u64,
        batch_size: usize,
    ) -> Result<Vec<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let all = self
            .tables
            .lock()
            .unwrap()
            .get(&query.table)
            .cloned()
            .ok_or_else(|| MigrateError::transfer(&query.table, "Invalid object name"))?;

        let mut rows: Vec<Row> = all
            .into_iter()
            .filter(|r| query.filter.as_ref().map_or(true, |f| matches(schema, f, r)))
            .collect();
        let order = column_index(schema, &query.order_by);
        rows.sort_by_key(|r| sort_key(&r[order]));

        let page_rows: Vec<Row> = match &query.pagination {
            Pagination::Keyset { index, .. } => rows
                .into_iter()
                .filter(|r| cursor.map_or(true, |c| r[*index].as_i64().is_some_and(|v| v > c)))
                .take(batch_size)
                .collect(),
            Pagination::Offset { start } => rows
                .into_iter()
                .skip((*start + page * batch_size as u64) as usize)
                .take(batch_size)
                .collect(),
        };

        self.pages
            .lock()
            .unwrap()
            .push((query.table.clone(), page_rows.len()));
        Ok(page_rows)
    }

    async fn row_count(&self, table: &str) -> Result<i64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, |rows| rows.len() as i64))
    }

    async fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TargetTable {
    /// Primary key columns. Empty means no uniqueness.
    key: Vec<String>,
    columns: Vec<String>,
    identity: Option<String>,
    rows: Vec<Row>,
    next_auto: i64,
}

impl TargetTable {
    fn index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    fn key_of(&self, row: &Row) -> Option<Vec<SqlValue>> {
        if self.key.is_empty() {
            return None;
        }
        self.key
            .iter()
            .map(|k| self.index(k).map(|i| row[i].clone()))
            .collect()
    }
}

/// MySQL-like target keeping rows in memory.
#[derive(Default)]
pub struct MemoryTarget {
    tables: Mutex<BTreeMap<String, TargetTable>>,
    failing: Mutex<HashSet<(String, i64)>>,
    ddl: Mutex<Vec<String>>,
}

impl MemoryTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an empty table keyed by `key`.
    pub fn create(&self, table: &str, key: &[&str]) {
        self.tables.lock().unwrap().insert(
            table.to_string(),
            TargetTable {
                key: key.iter().map(|k| k.to_string()).collect(),
                next_auto: 1,
                ..Default::default()
            },
        );
    }

    /// Load source rows as a previous run would have written them.
    pub fn seed(&self, schema: &TableSchema, rows: Vec<Row>) {
        let mut tables = self.tables.lock().unwrap();
        let t = tables.get_mut(&schema.name).expect("create the table first");
        t.columns = schema.columns.iter().map(|c| c.name.clone()).collect();
        t.identity = schema.identity_column().map(|c| c.name.clone());
        for row in rows {
            let row: Row = row.into_iter().map(transcode).collect();
            if let Some(id) = t.identity.as_ref().and_then(|c| t.index(c)).and_then(|i| row[i].as_i64()) {
                t.next_auto = t.next_auto.max(id + 1);
            }
            t.rows.push(row);
        }
    }

    /// Next auto-increment value handed out for identity value 0.
    pub fn set_auto_increment(&self, table: &str, next: i64) {
        let mut tables = self.tables.lock().unwrap();
        tables.get_mut(table).expect("table exists").next_auto = next;
    }

    /// Writes of the row with this identity value fail with a data error.
    pub fn fail_row(&self, table: &str, id: i64) {
        self.failing.lock().unwrap().insert((table.to_string(), id));
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Row whose first column equals `id`.
    pub fn row(&self, table: &str, id: i64) -> Option<Row> {
        self.rows(table)
            .into_iter()
            .find(|r| r.first().and_then(SqlValue::as_i64) == Some(id))
    }

    pub fn count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    pub fn ddl(&self) -> Vec<String> {
        self.ddl.lock().unwrap().clone()
    }
}

/// Pull the backtick-quoted names out of `text`.
fn quoted_names(text: &str) -> Vec<String> {
    text.split('`')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

fn column_max<T: Ord>(t: &TargetTable, column: &str, read: impl Fn(&SqlValue) -> Option<T>) -> Option<T> {
    let idx = t.index(column)?;
    t.rows.iter().filter_map(|r| read(&r[idx])).max()
}

fn read_timestamp(value: &SqlValue) -> Option<NaiveDateTime> {
    match value {
        SqlValue::Text(s) => NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).ok(),
        other => other.as_naive_datetime(),
    }
}

#[async_trait]
impl TargetSession for MemoryTarget {
    async fn row_count(&self, table: &str) -> Result<Option<i64>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.len() as i64))
    }

    async fn max_identity(&self, table: &str, column: &str) -> Result<Option<i64>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(table)
            .and_then(|t| column_max(t, column, SqlValue::as_i64)))
    }

    async fn max_timestamp(&self, table: &str, column: &str) -> Result<Option<NaiveDateTime>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(table)
            .and_then(|t| column_max(t, column, read_timestamp)))
    }

    async fn execute_ddl(&self, sql: &str) -> Result<()> {
        self.ddl.lock().unwrap().push(sql.to_string());
        let (head, key) = match sql.split_once("PRIMARY KEY") {
            Some((head, rest)) => (head, quoted_names(rest.split(')').next().unwrap_or(""))),
            None => (sql, Vec::new()),
        };
        let name = quoted_names(head)
            .into_iter()
            .next()
            .ok_or_else(|| MigrateError::Config(format!("unparseable DDL: {}", sql)))?;

        let mut tables = self.tables.lock().unwrap();
        if tables.contains_key(&name) {
            return Err(MigrateError::transfer(
                &name,
                format!("Table '{}' already exists", name),
            ));
        }
        tables.insert(
            name,
            TargetTable {
                key,
                next_auto: 1,
                ..Default::default()
            },
        );
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
        let mut tables = self.tables.lock().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| MigrateError::transfer(table, format!("Table '{}' doesn't exist", table)))?;
        if t.columns.is_empty() {
            t.columns = columns.iter().map(|c| c.to_string()).collect();
            t.identity = identity.map(str::to_string);
        }

        let mut row: Row = values.to_vec();
        let id_index = identity.and_then(|c| t.index(c));
        let source_id = id_index.and_then(|i| row[i].as_i64());

        if let Some(id) = source_id {
            if self.failing.lock().unwrap().contains(&(table.to_string(), id)) {
                return Err(MigrateError::transfer(
                    table,
                    format!("Data too long for column 'Name' at row id {}", id),
                ));
            }
        }

        let mut assigned = None;
        if let Some(i) = id_index {
            match source_id {
                Some(0) | None => {
                    row[i] = SqlValue::I64(t.next_auto);
                    assigned = Some(t.next_auto);
                    t.next_auto += 1;
                }
                Some(id) => {
                    t.next_auto = t.next_auto.max(id + 1);
                    assigned = Some(id);
                }
            }
        }

        let key = t.key_of(&row);
        let existing = key
            .as_ref()
            .and_then(|k| t.rows.iter().position(|r| t.key_of(r).as_ref() == Some(k)));

        match (existing, mode) {
            (None, _) => {
                t.rows.push(row);
                Ok(WriteResult::inserted(assigned))
            }
            (Some(_), WriteMode::Insert) => Err(MigrateError::transfer(
                table,
                format!("Duplicate entry '{:?}' for key 'PRIMARY'", key),
            )),
            (Some(_), WriteMode::InsertIgnore) => Ok(WriteResult::unchanged()),
            (Some(pos), WriteMode::Upsert) => {
                if t.rows[pos] == row {
                    Ok(WriteResult::unchanged())
                } else {
                    t.rows[pos] = row;
                    Ok(WriteResult::updated())
                }
            }
        }
    }

    async fn close(&self) {}
}
