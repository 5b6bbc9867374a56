//! Error types surfaced by the batch engine and its transport boundary.
//!
//! Validation errors (`NoRecords`, `NoKeyColumns`, `MissingKeyColumn`,
//! `UnknownColumn`, `NothingToUpdate`, `UnscopedDelete`) are raised before any
//! statement is sent to the store. Transport errors carry the underlying store
//! failure plus enough batch context to diagnose without tracing.

use std::error::Error as StdError;

use thiserror::Error;

/// Boxed source error carried by [`TransportError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure reported by a [`crate::Transport`] implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    /// Creates a transport error from a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a transport error wrapping an underlying cause.
    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Human-readable failure message (includes SQLSTATE for store errors).
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<tokio_postgres::Error> for TransportError {
    fn from(err: tokio_postgres::Error) -> Self {
        let message = match err.as_db_error() {
            Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
            None => err.to_string(),
        };
        Self::with_source(message, err)
    }
}

/// Every failure the batch engine can report to its caller.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The batch contained no records.
    #[error("no records to write into {table}")]
    NoRecords { table: String },

    /// An update was requested without any key column.
    #[error("no key columns given for update of {table}")]
    NoKeyColumns { table: String },

    /// A record of an update batch lacks one of the key columns.
    #[error("record {index} of batch for {table} does not contain key column {key}")]
    MissingKeyColumn {
        table: String,
        index: usize,
        key: String,
    },

    /// A record field has no matching column in the table catalog.
    #[error("column {column} is not present in the catalog of {table}")]
    UnknownColumn { table: String, column: String },

    /// An update partition has no column left for the SET clause.
    #[error("partition {partition} of update for {table} contains only key columns")]
    NothingToUpdate { table: String, partition: usize },

    /// The primary column introspection query failed.
    #[error("schema lookup for {table} failed: {source}")]
    SchemaLookup {
        table: String,
        #[source]
        source: TransportError,
    },

    /// A catalog row did not carry a field the catalog needs.
    #[error("catalog row for {table} is missing text field {field}")]
    MalformedCatalogRow { table: String, field: &'static str },

    /// Delete without predicate while the safety gate is closed.
    #[error("refusing to delete every row of {table}: pass allow_full_table_delete to run unscoped")]
    UnscopedDelete { table: String },

    /// A single (non-batched) statement failed in the store.
    #[error("statement against {table} failed: {source}")]
    Transport {
        table: String,
        #[source]
        source: TransportError,
    },

    /// A partition statement failed; later partitions were not started.
    #[error(
        "statement for partition {partition} of {table} failed after {completed} completed partition(s): {source}"
    )]
    PartitionTransport {
        table: String,
        partition: usize,
        completed: usize,
        #[source]
        source: TransportError,
    },

    /// Caller input could not be turned into a record.
    #[error("invalid record at position {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

impl BatchError {
    /// Returns `true` for failures detected before any statement executed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NoRecords { .. }
                | Self::NoKeyColumns { .. }
                | Self::MissingKeyColumn { .. }
                | Self::UnknownColumn { .. }
                | Self::NothingToUpdate { .. }
                | Self::UnscopedDelete { .. }
                | Self::InvalidRecord { .. }
        )
    }
}
