//! Database access layer for the podmark platform.
//!
//! Provides a bounded SQLite connection pool, a parameterized query
//! builder, a generic record mapper with CRUD operations, and a versioned
//! migration runner. Entity mappings for every podmark table live in
//! [`models`], and the schema they rely on ships as embedded migrations.
//!
//! # Design decisions
//!
//! - **Explicit pool object**: the pool is built once with [`create_pool`]
//!   and passed by reference to records and the migration runner. There is
//!   no global connection state.
//! - **Identifiers from static schemas only**: table and column names reach
//!   SQL solely through compile-time [`TableSchema`] declarations; every
//!   value is a bound parameter.
//! - **Forward and backward scripts per migration**: each [`Migration`]
//!   names both scripts explicitly, and each step runs in its own
//!   transaction.

mod error;
mod migrations;
pub mod models;
mod pool;
mod query;
mod record;

pub use error::DbError;
pub use migrations::{
    run_migrations, Direction, Migration, MigrationError, MigrationReport, MigrationRunner,
    MigrationStatus, MIGRATIONS,
};
pub use pool::{
    create_pool, DbPool, DbRuntimeSettings, Pool, PoolConfig, PoolStatus, PooledConnection,
};
pub use query::{Order, QueryBuilder, TableSchema};
pub use record::{FieldValue, GeneratedKey, Record, Row};
