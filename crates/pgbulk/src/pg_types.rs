//! PostgreSQL binary codec for [`FieldValue`].
//!
//! Every placeholder the synthesizer emits carries a cast, so the server
//! infers a concrete parameter type for each `$n`. Encoding dispatches on that
//! type; text values are parsed into the target type when it is not text-like,
//! which lets JSON string input fill date, numeric, integer or boolean columns.
//! Types without an encoding here are bound as text and cast by the server
//! (see [`binds_natively`]).

use std::error::Error as StdError;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use uuid::Uuid;

use crate::record::FieldValue;

type CodecResult<T> = Result<T, Box<dyn StdError + Sync + Send>>;

/// `2^63`; floats in `[-2^63, 2^63)` convert to `i64` without saturating.
const I64_FLOAT_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Coarse classification of a parameter or column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    Uuid,
    Other,
}

fn classify(ty: &Type) -> PgKind {
    if matches!(ty.kind(), Kind::Enum(_)) {
        return PgKind::Text;
    }
    classify_name(ty.name())
}

fn classify_name(name: &str) -> PgKind {
    match name {
        "bool" => PgKind::Bool,
        "int2" => PgKind::Int2,
        "int4" => PgKind::Int4,
        "int8" => PgKind::Int8,
        "oid" => PgKind::Oid,
        "float4" => PgKind::Float4,
        "float8" => PgKind::Float8,
        "numeric" => PgKind::Numeric,
        "text" | "varchar" | "bpchar" | "name" | "unknown" | "citext" | "char" => PgKind::Text,
        "date" => PgKind::Date,
        "time" => PgKind::Time,
        "timestamp" => PgKind::Timestamp,
        "timestamptz" => PgKind::TimestampTz,
        "json" | "jsonb" => PgKind::Json,
        "uuid" => PgKind::Uuid,
        _ => PgKind::Other,
    }
}

/// Whether values can be bound directly as parameters of the built-in type
/// `type_name`. Other types have to travel as text.
pub(crate) fn binds_natively(type_name: &str) -> bool {
    classify_name(type_name) != PgKind::Other
}

fn mismatch(value: &FieldValue, ty: &Type) -> Box<dyn StdError + Sync + Send> {
    format!("cannot bind {value:?} as parameter of type {}", ty.name()).into()
}

impl ToSql for FieldValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> CodecResult<IsNull> {
        if let FieldValue::Null = self {
            return Ok(IsNull::Yes);
        }
        if let FieldValue::Opaque { type_name, bytes } = self {
            if type_name != ty.name() {
                return Err(mismatch(self, ty));
            }
            out.put_slice(bytes);
            return Ok(IsNull::No);
        }

        match classify(ty) {
            PgKind::Bool => bool_value(self, ty)?.to_sql(ty, out),
            PgKind::Int2 => i16::try_from(int_value(self, ty)?)?.to_sql(ty, out),
            PgKind::Int4 => i32::try_from(int_value(self, ty)?)?.to_sql(ty, out),
            PgKind::Int8 => int_value(self, ty)?.to_sql(ty, out),
            PgKind::Oid => u32::try_from(int_value(self, ty)?)?.to_sql(ty, out),
            PgKind::Float4 => (float_value(self, ty)? as f32).to_sql(ty, out),
            PgKind::Float8 => float_value(self, ty)?.to_sql(ty, out),
            PgKind::Numeric => decimal_value(self, ty)?.to_sql(ty, out),
            PgKind::Text => {
                out.put_slice(text_value(self).as_bytes());
                Ok(IsNull::No)
            }
            PgKind::Date => date_value(self, ty)?.to_sql(ty, out),
            PgKind::Time => time_value(self, ty)?.to_sql(ty, out),
            PgKind::Timestamp => timestamp_value(self, ty)?.naive_local().to_sql(ty, out),
            PgKind::TimestampTz => timestamp_value(self, ty)?.to_sql(ty, out),
            PgKind::Json => json_value(self).to_sql(ty, out),
            PgKind::Uuid => uuid_value(self, ty)?.to_sql(ty, out),
            PgKind::Other => Err(format!(
                "no binary encoding for parameter type {}.{}",
                ty.schema(),
                ty.name()
            )
            .into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for FieldValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> CodecResult<Self> {
        let value = match classify(ty) {
            PgKind::Bool => FieldValue::Bool(bool::from_sql(ty, raw)?),
            PgKind::Int2 => FieldValue::Int(i64::from(i16::from_sql(ty, raw)?)),
            PgKind::Int4 => FieldValue::Int(i64::from(i32::from_sql(ty, raw)?)),
            PgKind::Int8 => FieldValue::Int(i64::from_sql(ty, raw)?),
            PgKind::Oid => FieldValue::Int(i64::from(u32::from_sql(ty, raw)?)),
            PgKind::Float4 => FieldValue::Float(f64::from(f32::from_sql(ty, raw)?)),
            PgKind::Float8 => FieldValue::Float(f64::from_sql(ty, raw)?),
            // NaN and values beyond 28 significant digits stay undecoded
            PgKind::Numeric => match Decimal::from_sql(ty, raw) {
                Ok(decimal) => FieldValue::Text(decimal.to_string()),
                Err(_) => opaque(ty, raw),
            },
            PgKind::Text => FieldValue::Text(std::str::from_utf8(raw)?.to_string()),
            PgKind::Date => FieldValue::Date(NaiveDate::from_sql(ty, raw)?),
            PgKind::Time => FieldValue::Time(NaiveTime::from_sql(ty, raw)?),
            PgKind::Timestamp => {
                FieldValue::Timestamp(local_from_naive(NaiveDateTime::from_sql(ty, raw)?))
            }
            PgKind::TimestampTz => FieldValue::Timestamp(
                DateTime::<Utc>::from_sql(ty, raw)?
                    .with_timezone(&Local)
                    .fixed_offset(),
            ),
            PgKind::Json => FieldValue::Json(JsonValue::from_sql(ty, raw)?),
            PgKind::Uuid => FieldValue::Text(Uuid::from_sql(ty, raw)?.to_string()),
            PgKind::Other => opaque(ty, raw),
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> CodecResult<Self> {
        Ok(FieldValue::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn opaque(ty: &Type, raw: &[u8]) -> FieldValue {
    FieldValue::Opaque {
        type_name: ty.name().to_string(),
        bytes: raw.to_vec(),
    }
}

/// Interprets a zone-less timestamp as process-local wall-clock time, the way
/// the store driver hands such values to applications.
fn local_from_naive(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.fixed_offset(),
        None => Utc.from_utc_datetime(&naive).fixed_offset(),
    }
}

fn bool_value(value: &FieldValue, ty: &Type) -> CodecResult<bool> {
    match value {
        FieldValue::Bool(flag) => Ok(*flag),
        FieldValue::Int(0) => Ok(false),
        FieldValue::Int(1) => Ok(true),
        FieldValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "t" | "true" | "yes" | "on" | "1" => Ok(true),
            "f" | "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(mismatch(value, ty)),
        },
        _ => Err(mismatch(value, ty)),
    }
}

fn int_value(value: &FieldValue, ty: &Type) -> CodecResult<i64> {
    match value {
        FieldValue::Int(int) => Ok(*int),
        FieldValue::Bool(flag) => Ok(i64::from(*flag)),
        FieldValue::Float(float)
            if float.fract() == 0.0 && (-I64_FLOAT_BOUND..I64_FLOAT_BOUND).contains(float) =>
        {
            Ok(*float as i64)
        }
        FieldValue::Text(text) => Ok(text.trim().parse::<i64>()?),
        _ => Err(mismatch(value, ty)),
    }
}

fn float_value(value: &FieldValue, ty: &Type) -> CodecResult<f64> {
    match value {
        FieldValue::Float(float) => Ok(*float),
        FieldValue::Int(int) => Ok(*int as f64),
        FieldValue::Text(text) => Ok(text.trim().parse::<f64>()?),
        _ => Err(mismatch(value, ty)),
    }
}

/// Exact decimal for a NUMERIC parameter; literals that do not fit 28
/// significant digits are rejected rather than rounded.
fn decimal_value(value: &FieldValue, ty: &Type) -> CodecResult<Decimal> {
    match value {
        FieldValue::Int(int) => Ok(Decimal::from(*int)),
        FieldValue::Float(float) if float.is_finite() => {
            Ok(Decimal::from_str_exact(&float.to_string())?)
        }
        FieldValue::Text(text) => Ok(Decimal::from_str_exact(text.trim())?),
        _ => Err(mismatch(value, ty)),
    }
}

fn uuid_value(value: &FieldValue, ty: &Type) -> CodecResult<Uuid> {
    match value {
        FieldValue::Text(text) => Ok(Uuid::parse_str(text.trim())?),
        FieldValue::Json(JsonValue::String(text)) => Ok(Uuid::parse_str(text.trim())?),
        _ => Err(mismatch(value, ty)),
    }
}

fn text_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => text.clone(),
        FieldValue::Json(JsonValue::String(text)) => text.clone(),
        other => match other.to_json() {
            JsonValue::String(text) => text,
            json => json.to_string(),
        },
    }
}

fn date_value(value: &FieldValue, ty: &Type) -> CodecResult<NaiveDate> {
    match value {
        FieldValue::Date(date) => Ok(*date),
        FieldValue::Timestamp(ts) => Ok(ts.date_naive()),
        FieldValue::Text(text) => {
            let text = text.trim();
            match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                Ok(date) => Ok(date),
                Err(_) => Ok(parse_timestamp(text)?.date_naive()),
            }
        }
        _ => Err(mismatch(value, ty)),
    }
}

fn time_value(value: &FieldValue, ty: &Type) -> CodecResult<NaiveTime> {
    match value {
        FieldValue::Time(time) => Ok(*time),
        FieldValue::Timestamp(ts) => Ok(ts.time()),
        FieldValue::Text(text) => Ok(NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")?),
        _ => Err(mismatch(value, ty)),
    }
}

fn timestamp_value(value: &FieldValue, ty: &Type) -> CodecResult<DateTime<FixedOffset>> {
    match value {
        FieldValue::Timestamp(ts) => Ok(*ts),
        FieldValue::Date(date) => Ok(local_from_naive(date.and_time(NaiveTime::MIN))),
        FieldValue::Text(text) => parse_timestamp(text.trim()),
        _ => Err(mismatch(value, ty)),
    }
}

/// Accepts RFC 3339 and the common zone-less `YYYY-MM-DD[ T]HH:MM:SS[.f]` forms.
fn parse_timestamp(text: &str) -> CodecResult<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(local_from_naive(naive));
        }
    }
    Err(format!("invalid timestamp literal {text:?}").into())
}

fn json_value(value: &FieldValue) -> JsonValue {
    match value {
        FieldValue::Json(json) => json.clone(),
        FieldValue::Text(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()))
        }
        other => other.to_json(),
    }
}
