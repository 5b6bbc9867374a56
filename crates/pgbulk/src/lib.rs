//! Schema-aware batch writes for PostgreSQL.
//!
//! A batch of heterogeneous records is split into shape-homogeneous
//! partitions, each rendered as one multi-row `INSERT` or one
//! `UPDATE ... FROM (VALUES ...)` join with explicit per-column casts taken
//! from the table catalog. Partitions execute sequentially and fail fast.
//!
//! The crate also carries the read-side row decorator, a guarded delete, a
//! `tokio_postgres` transport and the environment-driven configuration used by
//! the `pgbulk` binary.

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;
use tracing::{info, warn};

pub mod catalog;
pub mod decorate;
pub mod engine;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod partition;
mod pg_types;
pub mod record;
pub mod statement;
pub mod transport;

pub use catalog::{CastType, ColumnMetadata, TableSchema};
pub use decorate::decorate_rows;
pub use engine::{BatchEngine, SelectRequest, WriteOutcome};
pub use error::{BatchError, TransportError};
pub use guard::DeleteRequest;
pub use metrics::{BatchMetrics, BatchMetricsSnapshot};
pub use record::{read_records, records_from_json, FieldValue, Record, ShapeKey};
pub use transport::{PgTransport, QueryOutput, TableRef, Transport};

const DEFAULT_DATABASE_URL: &str = "host=127.0.0.1 port=5432 user=postgres dbname=postgres";
const DEFAULT_SCHEMA: &str = "public";

/// Connection and engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// `tokio_postgres` connection string (key/value or URL form).
    pub database_url: String,
    /// Schema used to qualify bare table names.
    pub schema: String,
    /// Log every synthesized statement at `info` instead of `debug`.
    pub statement_log: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            statement_log: false,
        }
    }
}

impl BatchConfig {
    /// Loads configuration from `PGBULK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("PGBULK_DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let schema = lookup("PGBULK_SCHEMA")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        let statement_log = parse_bool(lookup("PGBULK_STATEMENT_LOG"), false)?;
        Ok(Self {
            database_url,
            schema,
            statement_log,
        })
    }

    /// Qualifies `raw` (`table` or `schema.table`) with the configured schema.
    pub fn table(&self, raw: &str) -> TableRef {
        TableRef::resolve(&self.schema, raw)
    }
}

/// Opens a client for `config` and spawns its connection task.
///
/// Dropping the returned transport closes the connection; the handle then
/// resolves once the task has shut down.
pub async fn connect(config: &BatchConfig) -> Result<(PgTransport, JoinHandle<()>)> {
    let (client, connection) = tokio_postgres::connect(&config.database_url, NoTls)
        .await
        .context("connect to PostgreSQL")?;
    let handle = tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(error = %err, "PostgreSQL connection terminated with error");
        }
    });
    info!(schema = %config.schema, "connected to PostgreSQL");
    Ok((PgTransport::new(client), handle))
}

/// Parses an optional boolean flag with fallback default.
fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(anyhow!("invalid bool value: {raw}")),
        },
        None => Ok(default_value),
    }
}
