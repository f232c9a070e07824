//! Error taxonomy for the database access layer.

use std::time::Duration;

/// Errors returned by pool, query builder, and record operations.
///
/// Nothing in this crate retries; every variant is handed back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No connection became free before the caller's deadline.
    #[error("no database connection became available within {0:?}")]
    PoolExhausted(Duration),

    /// The pool was shut down.
    #[error("database connection pool is shut down")]
    PoolClosed,

    /// Opening or validating an underlying session failed.
    #[error("database connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The pool configuration is unusable.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// Statement execution failed, including constraint violations.
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),

    /// A statement ran past its deadline and was interrupted by the driver.
    #[error("query interrupted: statement deadline exceeded")]
    Interrupted,

    /// A keyed lookup, update, or delete matched no row.
    #[error("no row in `{table}` where {column} = {key}")]
    NotFound {
        /// Table that was searched.
        table: &'static str,
        /// Primary-key column.
        column: &'static str,
        /// Key value that missed.
        key: i64,
    },

    /// The operation is not valid for the record's lifecycle state.
    #[error("invalid record state: {0}")]
    InvalidState(String),

    /// The query builder was misused (unknown identifier, placeholder mismatch, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A column value could not be converted to or from its field type.
    #[error("cannot map column `{column}`: {reason}")]
    Mapping {
        /// Column being mapped.
        column: String,
        /// What went wrong.
        reason: String,
    },
}

impl DbError {
    pub(crate) fn mapping(column: &str, reason: impl ToString) -> Self {
        Self::Mapping {
            column: column.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for errors that say nothing about the statement itself
    /// (pool pressure or shutdown), which callers may choose to retry.
    pub fn is_pool_error(&self) -> bool {
        matches!(self, Self::PoolExhausted(_) | Self::PoolClosed)
    }
}
