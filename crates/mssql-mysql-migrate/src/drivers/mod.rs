//! Database driver implementations.
//!
//! - [`mssql`]: SQL Server source ([`SourceSession`](crate::core::SourceSession))
//! - [`mysql`]: MySQL target ([`TargetSession`](crate::core::TargetSession))

pub mod mssql;
pub mod mysql;
