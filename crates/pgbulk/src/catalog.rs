//! Column catalog lookups for a target table.
//!
//! The catalog is fetched once at the start of every batch call and dropped at
//! the end of it. Enum label enrichment is best-effort: a failing label lookup
//! is logged and leaves the column with an empty label set.

use serde::Serialize;
use tracing::{debug, warn};

use serde_json::Value as JsonValue;

use crate::error::{BatchError, TransportError};
use crate::metrics::BatchMetrics;
use crate::pg_types::binds_natively;
use crate::record::{FieldValue, Record};
use crate::statement::{array_literal, quote_ident};
use crate::transport::{TableRef, Transport};

/// `information_schema.columns.data_type` value for enum and composite types.
const USER_DEFINED_DATA_TYPE: &str = "USER-DEFINED";
/// `information_schema.columns.data_type` value for array columns.
const ARRAY_DATA_TYPE: &str = "ARRAY";
/// Schema holding the built-in types; columns typed from it never carry labels.
const BUILTIN_TYPE_SCHEMA: &str = "pg_catalog";

/// Cast annotation chosen for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CastType {
    /// Built-in type with a binary parameter encoding, cast directly (`$1::int4`).
    Native { name: String },
    /// Built-in type without a binary parameter encoding (`interval`, `inet`,
    /// arrays, ...). The value is bound as text and the server converts it
    /// through the second cast (`$1::text::interval`).
    TextBridge {
        schema: Option<String>,
        name: String,
        array: bool,
    },
    /// Enum or composite type. The value is bound as text and the server
    /// converts it through the second cast (`$1::text::public.mood`).
    UserDefined { schema: String, name: String },
}

impl CastType {
    /// Fully rendered native type name, schema-qualified when needed.
    pub fn type_sql(&self) -> String {
        match self {
            Self::Native { name } | Self::TextBridge { schema: None, name, .. } => {
                quote_ident(name).into_owned()
            }
            Self::TextBridge {
                schema: Some(schema),
                name,
                ..
            }
            | Self::UserDefined { schema, name } => {
                format!("{}.{}", quote_ident(schema), quote_ident(name))
            }
        }
    }

    /// Renders the cast suffix for parameter `$index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Native { .. } => format!("${index}::{}", self.type_sql()),
            Self::TextBridge { .. } | Self::UserDefined { .. } => {
                format!("${index}::text::{}", self.type_sql())
            }
        }
    }

    pub fn is_user_defined(&self) -> bool {
        matches!(self, Self::UserDefined { .. })
    }

    /// Whether the parameter travels as text regardless of the column type.
    pub fn binds_as_text(&self) -> bool {
        !matches!(self, Self::Native { .. })
    }

    /// Prepares a record value for this cast's placeholder. JSON arrays bound
    /// through an array cast become array literals (`{"a","b"}`).
    pub fn bind_value(&self, value: FieldValue) -> FieldValue {
        match (self, value) {
            (Self::TextBridge { array: true, .. }, FieldValue::Json(JsonValue::Array(items))) => {
                FieldValue::Text(array_literal(&items))
            }
            (_, value) => value,
        }
    }
}

/// One physical column as reported by the store catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// SQL-standard type description (`integer`, `date`, `USER-DEFINED`, ...).
    pub data_type: String,
    /// Native type tag used for casts (`int4`, `date`, `mood`, ...).
    pub udt_name: String,
    pub udt_schema: String,
    /// Valid labels for enum columns; empty otherwise.
    pub enum_labels: Vec<String>,
}

impl ColumnMetadata {
    fn from_catalog_row(table: &TableRef, row: &Record) -> Result<Self, BatchError> {
        let text = |field: &'static str| {
            row.get_text(field)
                .map(str::to_string)
                .ok_or_else(|| BatchError::MalformedCatalogRow {
                    table: table.to_string(),
                    field,
                })
        };
        Ok(Self {
            name: text("column_name")?,
            data_type: text("data_type")?,
            udt_name: text("udt_name")?,
            udt_schema: text("udt_schema")?,
            enum_labels: Vec::new(),
        })
    }

    pub fn is_user_defined(&self) -> bool {
        self.data_type == USER_DEFINED_DATA_TYPE
    }

    /// Whether an enum label lookup may find anything for this column.
    pub fn may_have_labels(&self) -> bool {
        self.udt_schema != BUILTIN_TYPE_SCHEMA
    }

    pub fn is_date(&self) -> bool {
        self.data_type == "date"
    }

    pub fn cast_type(&self) -> CastType {
        if self.is_user_defined() {
            return CastType::UserDefined {
                schema: self.udt_schema.clone(),
                name: self.udt_name.clone(),
            };
        }
        let schema = (self.udt_schema != BUILTIN_TYPE_SCHEMA && !self.udt_schema.is_empty())
            .then(|| self.udt_schema.clone());
        if schema.is_none() && binds_natively(&self.udt_name) {
            return CastType::Native {
                name: self.udt_name.clone(),
            };
        }
        CastType::TextBridge {
            schema,
            name: self.udt_name.clone(),
            array: self.data_type == ARRAY_DATA_TYPE,
        }
    }
}

/// Catalog snapshot for one table, valid for a single batch call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    #[serde(serialize_with = "serialize_table")]
    pub table: TableRef,
    pub columns: Vec<ColumnMetadata>,
}

fn serialize_table<S: serde::Serializer>(table: &TableRef, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(table)
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Fetches column metadata for `table` without enum enrichment.
///
/// A table with no visible columns yields an empty schema, not an error.
pub async fn fetch_columns<T: Transport + ?Sized>(
    transport: &T,
    table: &TableRef,
) -> Result<TableSchema, BatchError> {
    let rows = transport
        .introspect_columns(table)
        .await
        .map_err(|source| BatchError::SchemaLookup {
            table: table.to_string(),
            source,
        })?;
    let columns = rows
        .iter()
        .map(|row| ColumnMetadata::from_catalog_row(table, row))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(table = %table, columns = columns.len(), "fetched column catalog");
    Ok(TableSchema {
        table: table.clone(),
        columns,
    })
}

/// Returns the ordered label set of an enum column.
///
/// Columns typed from `pg_catalog` return an empty set without a lookup.
pub async fn fetch_enum_labels<T: Transport + ?Sized>(
    transport: &T,
    table: &TableRef,
    column: &ColumnMetadata,
) -> Result<Vec<String>, TransportError> {
    if !column.may_have_labels() {
        return Ok(Vec::new());
    }
    let rows = transport
        .introspect_enum_labels(table, &column.name, &column.udt_schema, &column.udt_name)
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get_text("enumlabel").map(str::to_string))
        .collect())
}

/// Fetches the column catalog and attaches enum labels to every column.
pub async fn describe_table<T: Transport + ?Sized>(
    transport: &T,
    table: &TableRef,
    metrics: &BatchMetrics,
) -> Result<TableSchema, BatchError> {
    metrics.record_schema_lookup();
    let mut schema = fetch_columns(transport, table).await?;
    for column in &mut schema.columns {
        match fetch_enum_labels(transport, table, column).await {
            Ok(labels) => column.enum_labels = labels,
            Err(err) => {
                metrics.record_enum_lookup_failure();
                warn!(
                    table = %table,
                    column = %column.name,
                    type_name = %column.udt_name,
                    error = %err,
                    "enum label lookup failed; continuing without labels"
                );
                column.enum_labels = Vec::new();
            }
        }
    }
    Ok(schema)
}
