pub mod access;
pub mod catalog;
pub mod concurrency;
pub mod database;
pub mod error;
pub mod executor;
pub mod expression;
pub mod planner;
pub mod recovery;
pub mod sql;
pub mod storage;
pub mod transaction;

pub use database::{Config, Database, FsyncPolicy, ResultSet, Transaction};
pub use error::{DbError, DbResult};
