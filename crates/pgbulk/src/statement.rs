//! Statement synthesis for batched INSERT and UPDATE-by-VALUES-join.
//!
//! Cast resolution ([`ColumnCasts`]) happens once per batch and is kept apart
//! from text assembly: clause objects collect columns, casts and rows, and
//! [`ValuesList::render`] is the single place that writes placeholders.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::catalog::{CastType, TableSchema};
use crate::error::BatchError;
use crate::partition::Partition;
use crate::record::FieldValue;
use crate::transport::TableRef;

/// Alias of the target table in UPDATE statements.
const TARGET_ALIAS: &str = "t";
/// Alias of the VALUES table in UPDATE statements.
const SOURCE_ALIAS: &str = "c";

/// SQL text plus its positional parameters (`$1` is `params[0]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub params: Vec<FieldValue>,
}

/// Quotes an identifier unless it is a plain lower-case SQL identifier.
pub fn quote_ident(name: &str) -> Cow<'_, str> {
    let mut chars = name.chars();
    let plain = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        }
        None => false,
    };
    if plain {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!("\"{}\"", name.replace('"', "\"\"")))
    }
}

/// Renders a JSON array as a PostgreSQL array literal. Strings and objects
/// are double-quoted, nulls become `NULL`, nested arrays nest.
pub fn array_literal(items: &[JsonValue]) -> String {
    let elements = items
        .iter()
        .map(|item| match item {
            JsonValue::Null => "NULL".to_string(),
            JsonValue::Bool(_) | JsonValue::Number(_) => item.to_string(),
            JsonValue::Array(nested) => array_literal(nested),
            JsonValue::String(text) => quote_array_element(text),
            JsonValue::Object(_) => quote_array_element(&item.to_string()),
        })
        .collect::<Vec<_>>();
    format!("{{{}}}", elements.join(","))
}

fn quote_array_element(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Cast annotations for every column a batch touches.
#[derive(Debug, Clone, Default)]
pub struct ColumnCasts {
    by_column: BTreeMap<String, CastType>,
}

impl ColumnCasts {
    /// Resolves casts for all columns of all partitions against the catalog.
    ///
    /// The first column missing from the catalog fails the whole batch.
    pub fn resolve(schema: &TableSchema, partitions: &[Partition<'_>]) -> Result<Self, BatchError> {
        let mut by_column = BTreeMap::new();
        for partition in partitions {
            for name in partition.columns() {
                if by_column.contains_key(name) {
                    continue;
                }
                let column = schema
                    .column(name)
                    .ok_or_else(|| BatchError::UnknownColumn {
                        table: schema.table.to_string(),
                        column: name.clone(),
                    })?;
                by_column.insert(name.clone(), column.cast_type());
            }
        }
        Ok(Self { by_column })
    }

    pub fn get(&self, column: &str) -> Option<&CastType> {
        self.by_column.get(column)
    }

    pub fn len(&self) -> usize {
        self.by_column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_column.is_empty()
    }

    fn require(&self, table: &TableRef, column: &str) -> Result<&CastType, BatchError> {
        self.get(column).ok_or_else(|| BatchError::UnknownColumn {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

/// Multi-row `VALUES` list over one partition.
struct ValuesList<'p, 'r> {
    partition: &'p Partition<'r>,
    casts: Vec<&'p CastType>,
}

impl<'p, 'r> ValuesList<'p, 'r> {
    fn new(
        table: &TableRef,
        partition: &'p Partition<'r>,
        casts: &'p ColumnCasts,
    ) -> Result<Self, BatchError> {
        let casts = partition
            .columns()
            .iter()
            .map(|column| casts.require(table, column))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { partition, casts })
    }

    /// Writes `(…), (…)` row groups and pushes parameters row-major.
    fn render(&self, out: &mut String, params: &mut Vec<FieldValue>) {
        let columns = self.partition.columns();
        for (row_idx, record) in self.partition.records().iter().enumerate() {
            if row_idx > 0 {
                out.push_str(", ");
            }
            out.push('(');
            for (col_idx, (column, cast)) in columns.iter().zip(&self.casts).enumerate() {
                if col_idx > 0 {
                    out.push_str(", ");
                }
                let value = record.get(column).cloned().unwrap_or(FieldValue::Null);
                params.push(cast.bind_value(value));
                out.push_str(&cast.placeholder(params.len()));
            }
            out.push(')');
        }
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Normalizes a RETURNING list: blank means no RETURNING clause.
pub fn returning_clause(returning: Option<&str>) -> Option<&str> {
    returning.map(str::trim).filter(|text| !text.is_empty())
}

/// Builds `INSERT INTO <table> (cols) VALUES (...), ... [RETURNING ...]`.
pub fn insert_statement(
    table: &TableRef,
    partition: &Partition<'_>,
    casts: &ColumnCasts,
    returning: Option<&str>,
) -> Result<Statement, BatchError> {
    let values = ValuesList::new(table, partition, casts)?;
    let mut text = format!(
        "INSERT INTO {table} ({}) VALUES ",
        column_list(partition.columns())
    );
    let mut params = Vec::with_capacity(partition.len() * partition.columns().len());
    values.render(&mut text, &mut params);
    if let Some(returning) = returning_clause(returning) {
        text.push_str(" RETURNING ");
        text.push_str(returning);
    }
    Ok(Statement { text, params })
}

/// Builds the bulk UPDATE-by-VALUES-join for one partition.
///
/// ```text
/// UPDATE <table> AS t SET a = c.a, ...
/// FROM (VALUES (...), ...) AS c(k, a, ...)
/// WHERE c.k::<type> = t.k [AND ...]
/// ```
pub fn update_statement(
    table: &TableRef,
    partition_index: usize,
    partition: &Partition<'_>,
    casts: &ColumnCasts,
    keys: &[String],
) -> Result<Statement, BatchError> {
    let set_columns: Vec<&String> = partition
        .columns()
        .iter()
        .filter(|column| !keys.contains(*column))
        .collect();
    if set_columns.is_empty() {
        return Err(BatchError::NothingToUpdate {
            table: table.to_string(),
            partition: partition_index,
        });
    }

    let values = ValuesList::new(table, partition, casts)?;
    let assignments = set_columns
        .iter()
        .map(|column| {
            let column = quote_ident(column);
            format!("{column} = {SOURCE_ALIAS}.{column}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let predicate = keys
        .iter()
        .map(|key| -> Result<String, BatchError> {
            let cast = casts.require(table, key)?;
            let key = quote_ident(key);
            Ok(format!(
                "{SOURCE_ALIAS}.{key}::{} = {TARGET_ALIAS}.{key}",
                cast.type_sql()
            ))
        })
        .collect::<Result<Vec<_>, _>>()?
        .join(" AND ");

    let mut text = format!("UPDATE {table} AS {TARGET_ALIAS} SET {assignments} FROM (VALUES ");
    let mut params = Vec::with_capacity(partition.len() * partition.columns().len());
    values.render(&mut text, &mut params);
    text.push_str(&format!(
        ") AS {SOURCE_ALIAS}({}) WHERE {predicate}",
        column_list(partition.columns())
    ));
    Ok(Statement { text, params })
}
