//! Identifier validation and quoting.
//!
//! Table and column names cannot be bound as statement parameters, so every
//! name that ends up in generated SQL goes through one of these functions.
//! Names are checked for null bytes and length, then wrapped in the
//! dialect's quote characters with embedded quotes doubled.

use crate::error::{MigrateError, Result};

/// SQL Server allows 128 characters, MySQL 64. The looser limit is checked
/// here and MySQL reports anything in between when the DDL runs.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject empty, oversized, or null-byte identifiers.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier with backticks.
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Quote a SQL Server identifier with brackets.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// `[schema].[table]` for SQL Server.
pub fn qualify_mssql(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_mssql(schema)?, quote_mssql(table)?))
}

/// Quote and comma-join a column list.
pub fn quote_list(
    names: impl IntoIterator<Item = impl AsRef<str>>,
    quote: fn(&str) -> Result<String>,
) -> Result<String> {
    let quoted = names
        .into_iter()
        .map(|n| quote(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}
