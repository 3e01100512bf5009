//! Row values as they travel from the source session to the target session.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

/// One source row, values in the schema's column order.
pub type Row = Vec<SqlValue>;

/// A single column value.
///
/// Variants follow the SQL Server types the source driver can decode. The
/// type mapper's [`transcode`](crate::typemap::transcode) turns them into
/// what the MySQL target accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Decimal(Decimal),

    /// Timestamp without timezone (datetime, datetime2, smalldatetime).
    DateTime(NaiveDateTime),

    /// Timestamp with offset (datetimeoffset).
    DateTimeOffset(DateTime<FixedOffset>),

    Date(NaiveDate),
    Time(NaiveTime),
}

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, used for identity columns.
    ///
    /// Decimals with no fractional part also qualify since `numeric(18,0)`
    /// identity columns are common in older schemas.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I16(v) => Some(i64::from(*v)),
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    /// Naive wall-clock view of a temporal value.
    #[must_use]
    pub fn as_naive_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            SqlValue::DateTime(v) => Some(*v),
            SqlValue::DateTimeOffset(v) => Some(v.naive_local()),
            SqlValue::Date(d) => d.and_hms_opt(0, 0, 0),
            _ => None,
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::I32(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::I64(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}
