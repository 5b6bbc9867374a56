//! Query transport boundary and its PostgreSQL implementation.
//!
//! The engine only needs `execute(text, params)` plus two catalog lookups. The
//! catalog lookups have default implementations expressed through `execute`, so
//! a transport only has to know how to run a parameterized statement.

use std::fmt;

use async_trait::async_trait;
use futures_util::{pin_mut, TryStreamExt};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Row};

use crate::error::TransportError;
use crate::record::{FieldValue, Record};
use crate::statement::quote_ident;

/// Column catalog lookup, one row per physical column in ordinal order.
pub const COLUMNS_QUERY: &str = "SELECT column_name::text AS column_name, data_type::text AS data_type, \
udt_name::text AS udt_name, udt_schema::text AS udt_schema \
FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2 \
ORDER BY ordinal_position";

/// Enum label lookup for one user-defined type, in declaration order.
pub const ENUM_LABELS_QUERY: &str = "SELECT e.enumlabel::text AS enumlabel \
FROM pg_type t JOIN pg_enum e ON t.oid = e.enumtypid \
JOIN pg_namespace n ON n.oid = t.typnamespace \
WHERE n.nspname = $1 AND t.typname = $2 ORDER BY e.enumsortorder";

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Resolves `schema.table` or bare `table` against a default schema.
    pub fn resolve(default_schema: &str, raw: &str) -> Self {
        match raw.trim().split_once('.') {
            Some((schema, name)) => Self::new(schema.trim(), name.trim()),
            None => Self::new(default_schema, raw.trim()),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }
}

/// Rows and affected-row count returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Record>,
    pub rows_affected: u64,
}

/// Execution boundary consumed by the engine.
///
/// Implementations own connection state; the engine never holds one across
/// calls. Timeouts and cancellation are the transport's business.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs one parameterized statement.
    async fn execute(&self, sql: &str, params: &[FieldValue])
        -> Result<QueryOutput, TransportError>;

    /// Returns `{column_name, data_type, udt_name, udt_schema}` rows for `table`.
    async fn introspect_columns(&self, table: &TableRef) -> Result<Vec<Record>, TransportError> {
        let params = [
            FieldValue::Text(table.schema.clone()),
            FieldValue::Text(table.name.clone()),
        ];
        Ok(self.execute(COLUMNS_QUERY, &params).await?.rows)
    }

    /// Returns `{enumlabel}` rows for the type `type_schema.type_name` used by
    /// `table.column`.
    async fn introspect_enum_labels(
        &self,
        _table: &TableRef,
        _column: &str,
        type_schema: &str,
        type_name: &str,
    ) -> Result<Vec<Record>, TransportError> {
        let params = [
            FieldValue::Text(type_schema.to_string()),
            FieldValue::Text(type_name.to_string()),
        ];
        Ok(self.execute(ENUM_LABELS_QUERY, &params).await?.rows)
    }
}

/// [`Transport`] over a `tokio_postgres` client.
pub struct PgTransport {
    client: Client,
}

impl PgTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn into_inner(self) -> Client {
        self.client
    }
}

#[async_trait]
impl Transport for PgTransport {
    async fn execute(
        &self,
        sql: &str,
        params: &[FieldValue],
    ) -> Result<QueryOutput, TransportError> {
        let stream = self
            .client
            .query_raw(sql, params.iter().map(|p| p as &(dyn ToSql + Sync)))
            .await?;
        pin_mut!(stream);

        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await? {
            rows.push(decode_row(&row)?);
        }
        let rows_affected = stream.rows_affected().unwrap_or(rows.len() as u64);
        Ok(QueryOutput {
            rows,
            rows_affected,
        })
    }
}

/// Decodes a driver row into a record keyed by result column name.
fn decode_row(row: &Row) -> Result<Record, TransportError> {
    let mut record = Record::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value: FieldValue = row.try_get(idx)?;
        record.insert(column.name(), value);
    }
    Ok(record)
}
