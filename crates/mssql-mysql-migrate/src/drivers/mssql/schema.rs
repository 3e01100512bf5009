//! Schema extraction from the SQL Server catalog views.

use tiberius::{Query, Row as TdsRow};
use tracing::{debug, info};

use crate::core::{ColumnSpec, TableSchema};
use crate::error::Result;
use crate::typemap::generate_create_sql;

use super::reader::{MssqlClient, MssqlSource};

/// User tables of one schema with their partition row counts, largest first.
const TABLES_QUERY: &str = r#"
    SELECT
        t.name,
        CAST(SUM(p.rows) AS BIGINT) AS row_count
    FROM sys.tables t
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    JOIN sys.partitions p ON t.object_id = p.object_id AND p.index_id IN (0, 1)
    WHERE s.name = @P1
      AND t.is_ms_shipped = 0
    GROUP BY t.name
    ORDER BY row_count DESC, t.name
"#;

/// Column facts in declaration order. `max_length` is the byte length
/// reported by `sys.columns`, -1 for MAX types.
const COLUMNS_QUERY: &str = r#"
    SELECT
        c.name,
        ty.name AS data_type,
        CAST(c.max_length AS INT),
        CAST(c.precision AS INT),
        CAST(c.scale AS INT),
        CAST(c.is_nullable AS INT),
        CAST(c.is_identity AS INT),
        CAST(CASE WHEN pk.column_id IS NULL THEN 0 ELSE 1 END AS INT)
    FROM sys.tables t
    JOIN sys.schemas s ON t.schema_id = s.schema_id
    JOIN sys.columns c ON t.object_id = c.object_id
    JOIN sys.types ty ON c.user_type_id = ty.user_type_id
    LEFT JOIN (
        SELECT ic.object_id, ic.column_id
        FROM sys.indexes i
        JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id
        WHERE i.is_primary_key = 1
    ) pk ON pk.object_id = c.object_id AND pk.column_id = c.column_id
    WHERE s.name = @P1 AND t.name = @P2
    ORDER BY c.column_id
"#;

impl MssqlSource {
    /// Read every user table of the configured schema, flag modification
    /// columns by `patterns`, and render the MySQL DDL for each.
    pub async fn extract_schema(&self, patterns: &[String]) -> Result<Vec<TableSchema>> {
        let mut client = self.get_client().await?;

        let mut query = Query::new(TABLES_QUERY);
        query.bind(self.schema());
        let rows = query.query(&mut *client).await?.into_first_result().await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let name = text(&row, 0)?;
            let row_count = row.try_get::<i64, _>(1)?.unwrap_or(0);

            let columns = self.load_columns(&mut *client, &name).await?;
            let mut table = TableSchema {
                name,
                row_count,
                columns,
                create_sql: String::new(),
            };
            table.resolve_modification_column(patterns);
            table.normalize_capabilities();
            table.create_sql = generate_create_sql(&table)?;

            debug!(
                "{}: {} columns, {} rows, identity={:?}, modified={:?}",
                table.name,
                table.columns.len(),
                table.row_count,
                table.identity_column().map(|c| c.name.as_str()),
                table.modification_column().map(|c| c.name.as_str())
            );
            tables.push(table);
        }

        info!(
            "Extracted {} tables from schema {}",
            tables.len(),
            self.schema()
        );
        Ok(tables)
    }

    async fn load_columns(&self, client: &mut MssqlClient, table: &str) -> Result<Vec<ColumnSpec>> {
        let mut query = Query::new(COLUMNS_QUERY);
        query.bind(self.schema());
        query.bind(table);
        let rows = query.query(client).await?.into_first_result().await?;

        rows.iter()
            .map(|row| {
                let flag = |idx: usize| -> Result<bool> {
                    Ok(row.try_get::<i32, _>(idx)?.unwrap_or(0) == 1)
                };
                Ok(ColumnSpec {
                    name: text(row, 0)?,
                    data_type: text(row, 1)?,
                    max_length: row.try_get::<i32, _>(2)?.unwrap_or(0),
                    precision: row.try_get::<i32, _>(3)?.unwrap_or(0),
                    scale: row.try_get::<i32, _>(4)?.unwrap_or(0),
                    is_nullable: flag(5)?,
                    is_identity: flag(6)?,
                    is_primary_key: flag(7)?,
                    is_modification_timestamp: false,
                })
            })
            .collect()
    }
}

fn text(row: &TdsRow, idx: usize) -> Result<String> {
    Ok(row
        .try_get::<&str, _>(idx)?
        .unwrap_or_default()
        .to_string())
}
