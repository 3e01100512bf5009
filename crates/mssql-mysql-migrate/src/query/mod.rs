//! Incremental selection queries.
//!
//! [`build`] turns a table's [`MigrationStatus`] into a [`SelectionQuery`]:
//! which rows still need to move, in what order, and how to page through
//! them. [`SelectionQuery::page_sql`] renders one page as T-SQL for the
//! SQL Server source.

use chrono::NaiveDateTime;

use crate::checkpoint::{MigrationState, MigrationStatus};
use crate::core::identifier::{qualify_mssql, quote_mssql};
use crate::core::TableSchema;
use crate::error::{MigrateError, Result};
use crate::typemap::format_timestamp;

/// `column > id` on the identity column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPredicate {
    pub column: String,
    pub after: i64,
}

/// `column > timestamp` on the modification-timestamp column, or
/// `column >= timestamp` when `inclusive`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedPredicate {
    pub column: String,
    pub after: NaiveDateTime,
    /// Rows stamped with the watermark itself are selected again.
    pub inclusive: bool,
}

impl ModifiedPredicate {
    pub fn matches(&self, value: NaiveDateTime) -> bool {
        if self.inclusive {
            value >= self.after
        } else {
            value > self.after
        }
    }
}

/// Row predicate of a selection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    IdAfter(IdPredicate),
    ModifiedAfter(ModifiedPredicate),

    /// New rows or recently modified rows.
    Either(IdPredicate, ModifiedPredicate),
}

impl Filter {
    /// Timestamp predicate carried by this filter, if any.
    pub fn modified(&self) -> Option<&ModifiedPredicate> {
        match self {
            Filter::ModifiedAfter(m) | Filter::Either(_, m) => Some(m),
            Filter::IdAfter(_) => None,
        }
    }

    fn to_tsql(&self) -> Result<String> {
        Ok(match self {
            Filter::IdAfter(p) => id_tsql(p)?,
            Filter::ModifiedAfter(p) => modified_tsql(p)?,
            Filter::Either(id, m) => format!("({} OR {})", id_tsql(id)?, modified_tsql(m)?),
        })
    }
}

fn id_tsql(p: &IdPredicate) -> Result<String> {
    Ok(format!("{} > {}", quote_mssql(&p.column)?, p.after))
}

fn modified_tsql(p: &ModifiedPredicate) -> Result<String> {
    Ok(format!(
        "{} {} '{}'",
        quote_mssql(&p.column)?,
        if p.inclusive { ">=" } else { ">" },
        format_timestamp(&p.after)
    ))
}

/// How successive pages are located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// `column > cursor`, cursor being the last identity value fetched.
    Keyset { column: String, index: usize },

    /// Positional paging from `start`. Page `n` begins at `start + n * batch_size`.
    Offset { start: u64 },
}

/// Structured source-side selection for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionQuery {
    pub table: String,
    pub columns: Vec<String>,
    /// Columns selected as `CAST(.. AS NVARCHAR(MAX))`.
    pub text_columns: Vec<String>,
    pub filter: Option<Filter>,
    pub order_by: String,
    pub pagination: Pagination,
}

/// Switches that change how queries are built.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Page tables without identity or modification column from row 0.
    pub rescan_unkeyed_tables: bool,
}

/// Build the selection query for a table in the given state.
pub fn build(
    schema: &TableSchema,
    status: &MigrationStatus,
    options: QueryOptions,
) -> Result<SelectionQuery> {
    let first = schema.columns.first().ok_or_else(|| {
        MigrateError::SchemaCatalog(format!("table '{}' has no columns", schema.name))
    })?;
    let identity = schema
        .identity_index()
        .map(|i| (i, &schema.columns[i].name));
    let modification = schema.modification_column();

    let id_pred = identity
        .zip(status.last_id)
        .map(|((_, column), after)| IdPredicate {
            column: column.clone(),
            after,
        });
    // Without an identity column a partial resume has no other way to reach
    // unmigrated rows that share the watermark's timestamp. Re-fetched rows
    // hit the duplicate-key rule.
    let inclusive = identity.is_none() && status.state == MigrationState::Partial;
    let ts_pred = modification
        .zip(status.last_modified)
        .map(|(col, after)| ModifiedPredicate {
            column: col.name.clone(),
            after,
            inclusive,
        });

    let filter = match (id_pred, ts_pred) {
        (_, Some(ts)) if status.state == MigrationState::NeedsSync => {
            Some(Filter::ModifiedAfter(ts))
        }
        (Some(id), Some(ts)) => Some(Filter::Either(id, ts)),
        (Some(id), None) => Some(Filter::IdAfter(id)),
        (None, Some(ts)) => Some(Filter::ModifiedAfter(ts)),
        (None, None) => None,
    };

    let order_by = identity
        .map(|(_, name)| name.clone())
        .or_else(|| modification.map(|c| c.name.clone()))
        .unwrap_or_else(|| first.name.clone());

    let pagination = match identity {
        Some((index, column)) => Pagination::Keyset {
            column: column.clone(),
            index,
        },
        None if modification.is_some() || options.rescan_unkeyed_tables => {
            Pagination::Offset { start: 0 }
        }
        // Append-only fallback: rows past the current target count.
        None => Pagination::Offset {
            start: u64::try_from(status.current_rows).unwrap_or(0),
        },
    };

    Ok(SelectionQuery {
        table: schema.name.clone(),
        columns: schema.columns.iter().map(|c| c.name.clone()).collect(),
        text_columns: schema
            .columns
            .iter()
            .filter(|c| c.reads_as_text())
            .map(|c| c.name.clone())
            .collect(),
        filter,
        order_by,
        pagination,
    })
}

impl SelectionQuery {
    /// Split an `Either` filter into a new-row pass followed by an
    /// updated-row pass. Other queries come back unchanged.
    pub fn into_passes(self) -> Vec<SelectionQuery> {
        match self.filter {
            Some(Filter::Either(ref id, ref ts)) => {
                let new_rows = SelectionQuery {
                    filter: Some(Filter::IdAfter(id.clone())),
                    ..self.clone()
                };
                let updated_rows = SelectionQuery {
                    filter: Some(Filter::ModifiedAfter(ts.clone())),
                    ..self
                };
                vec![new_rows, updated_rows]
            }
            _ => vec![self],
        }
    }

    /// Render one page as T-SQL.
    ///
    /// Keyset pages use `SELECT TOP`, offset pages `OFFSET .. FETCH NEXT`.
    pub fn page_sql(
        &self,
        source_schema: &str,
        cursor: Option<i64>,
        page: u64,
        batch_size: usize,
    ) -> Result<String> {
        let columns = self.select_list()?;
        let from = qualify_mssql(source_schema, &self.table)?;
        let order_by = quote_mssql(&self.order_by)?;

        let mut conditions = Vec::new();
        if let Some(filter) = &self.filter {
            conditions.push(filter.to_tsql()?);
        }

        match &self.pagination {
            Pagination::Keyset { column, .. } => {
                if let Some(cursor) = cursor {
                    conditions.push(format!("{} > {}", quote_mssql(column)?, cursor));
                }
                let mut sql = format!(
                    "SELECT TOP {} {} FROM {} WITH (NOLOCK)",
                    batch_size, columns, from
                );
                push_where(&mut sql, &conditions);
                sql.push_str(&format!(" ORDER BY {}", order_by));
                Ok(sql)
            }
            Pagination::Offset { start } => {
                let offset = start + page * batch_size as u64;
                let mut sql = format!("SELECT {} FROM {} WITH (NOLOCK)", columns, from);
                push_where(&mut sql, &conditions);
                sql.push_str(&format!(
                    " ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                    order_by, offset, batch_size
                ));
                Ok(sql)
            }
        }
    }

    fn select_list(&self) -> Result<String> {
        let items = self
            .columns
            .iter()
            .map(|name| -> Result<String> {
                let quoted = quote_mssql(name)?;
                Ok(if self.text_columns.contains(name) {
                    format!("CAST({0} AS NVARCHAR(MAX)) AS {0}", quoted)
                } else {
                    quoted
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(items.join(", "))
    }
}

fn push_where(sql: &mut String, conditions: &[String]) {
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
}
