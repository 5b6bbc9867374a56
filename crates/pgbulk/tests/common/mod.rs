//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::BytesMut;
use pgbulk::{FieldValue, QueryOutput, Record, TableRef, Transport, TransportError};
use tokio_postgres::types::{ToSql, Type};

/// One interaction observed by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Columns(TableRef),
    EnumLabels { type_schema: String, type_name: String },
    Execute { sql: String, params: Vec<FieldValue> },
}

/// In-memory transport that serves a fixed catalog and scripted replies.
///
/// Parameters are encoded against the type of their first cast before a reply
/// is consumed, so a value the driver would refuse fails the call the same way.
/// Unscripted `execute` calls succeed with no rows and zero affected rows.
#[derive(Default)]
pub struct RecordingTransport {
    tables: HashMap<TableRef, Vec<Record>>,
    enum_labels: HashMap<(String, String), Vec<String>>,
    failing_enum_types: HashSet<String>,
    fail_columns: bool,
    replies: Mutex<VecDeque<Result<QueryOutput, String>>>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `(column_name, data_type, udt_name, udt_schema)` rows for `table`.
    pub fn with_table(mut self, table: TableRef, columns: &[(&str, &str, &str, &str)]) -> Self {
        let rows = columns
            .iter()
            .map(|(name, data_type, udt_name, udt_schema)| {
                Record::new()
                    .with("column_name", *name)
                    .with("data_type", *data_type)
                    .with("udt_name", *udt_name)
                    .with("udt_schema", *udt_schema)
            })
            .collect();
        self.tables.insert(table, rows);
        self
    }

    pub fn with_enum(mut self, type_schema: &str, type_name: &str, labels: &[&str]) -> Self {
        self.enum_labels.insert(
            (type_schema.to_string(), type_name.to_string()),
            labels.iter().map(|label| label.to_string()).collect(),
        );
        self
    }

    /// Makes the label lookup for `type_name` fail.
    pub fn failing_enum(mut self, type_name: &str) -> Self {
        self.failing_enum_types.insert(type_name.to_string());
        self
    }

    /// Makes the column introspection query fail.
    pub fn failing_columns(mut self) -> Self {
        self.fail_columns = true;
        self
    }

    pub fn push_reply(&self, output: QueryOutput) {
        self.replies.lock().unwrap().push_back(Ok(output));
    }

    pub fn push_rows(&self, rows: Vec<Record>) {
        let rows_affected = rows.len() as u64;
        self.push_reply(QueryOutput {
            rows,
            rows_affected,
        });
    }

    pub fn push_failure(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Executed statements, in order, without catalog lookups.
    pub fn executed(&self) -> Vec<(String, Vec<FieldValue>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Execute { sql, params } => Some((sql, params)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn execute(
        &self,
        sql: &str,
        params: &[FieldValue],
    ) -> Result<QueryOutput, TransportError> {
        self.record(Call::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        encode_params(sql, params)?;
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(TransportError::new(message)),
            None => Ok(QueryOutput::default()),
        }
    }

    async fn introspect_columns(&self, table: &TableRef) -> Result<Vec<Record>, TransportError> {
        self.record(Call::Columns(table.clone()));
        if self.fail_columns {
            return Err(TransportError::new("relation catalog unavailable"));
        }
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }

    async fn introspect_enum_labels(
        &self,
        _table: &TableRef,
        _column: &str,
        type_schema: &str,
        type_name: &str,
    ) -> Result<Vec<Record>, TransportError> {
        self.record(Call::EnumLabels {
            type_schema: type_schema.to_string(),
            type_name: type_name.to_string(),
        });
        if self.failing_enum_types.contains(type_name) {
            return Err(TransportError::new(format!(
                "permission denied for type {type_name}"
            )));
        }
        Ok(self
            .enum_labels
            .get(&(type_schema.to_string(), type_name.to_string()))
            .map(|labels| {
                labels
                    .iter()
                    .map(|label| Record::new().with("enumlabel", label.as_str()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Built-in type of the first cast applied to `$index` in `sql`, if known.
fn placeholder_type(sql: &str, index: usize) -> Option<Type> {
    let marker = format!("${index}::");
    let start = sql.find(&marker)? + marker.len();
    let name: String = sql[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    let ty = match name.as_str() {
        "bool" => Type::BOOL,
        "int2" => Type::INT2,
        "int4" => Type::INT4,
        "int8" => Type::INT8,
        "float8" => Type::FLOAT8,
        "numeric" => Type::NUMERIC,
        "text" => Type::TEXT,
        "date" => Type::DATE,
        "timestamptz" => Type::TIMESTAMPTZ,
        "uuid" => Type::UUID,
        "jsonb" => Type::JSONB,
        _ => return None,
    };
    Some(ty)
}

fn encode_params(sql: &str, params: &[FieldValue]) -> Result<(), TransportError> {
    for (idx, param) in params.iter().enumerate() {
        let Some(ty) = placeholder_type(sql, idx + 1) else {
            continue;
        };
        let mut out = BytesMut::new();
        param.to_sql_checked(&ty, &mut out).map_err(|err| {
            TransportError::with_source(format!("error serializing parameter {idx}"), err)
        })?;
    }
    Ok(())
}

pub fn people() -> TableRef {
    TableRef::new("public", "t")
}

/// Transport serving `public.t (id int4, name text, born date, mood public.mood,
/// seen_at timestamptz, ref_id uuid, span interval, tags text[])`.
pub fn people_transport() -> RecordingTransport {
    RecordingTransport::new()
        .with_table(
            people(),
            &[
                ("id", "integer", "int4", "pg_catalog"),
                ("name", "text", "text", "pg_catalog"),
                ("born", "date", "date", "pg_catalog"),
                ("mood", "USER-DEFINED", "mood", "public"),
                ("seen_at", "timestamp with time zone", "timestamptz", "pg_catalog"),
                ("ref_id", "uuid", "uuid", "pg_catalog"),
                ("span", "interval", "interval", "pg_catalog"),
                ("tags", "ARRAY", "_text", "pg_catalog"),
            ],
        )
        .with_enum("public", "mood", &["sad", "ok", "happy"])
}
