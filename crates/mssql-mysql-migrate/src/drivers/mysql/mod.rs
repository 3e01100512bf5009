//! MySQL/MariaDB target.
//!
//! - [`MysqlTarget`]: pooled `mysql_async` session that reports checkpoint
//!   facts and writes rows one statement at a time.
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod writer;

pub use writer::MysqlTarget;
