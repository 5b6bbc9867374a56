//! Read-side row decoration.
//!
//! Two mutually exclusive passes over fetched rows:
//! - presentation form: `date` columns become fixed `YYYY-MM-DD` strings;
//! - wall-clock normalization: every timestamp is shifted by its own offset so
//!   the local wall-clock reading survives rendering in UTC. The driver hands
//!   zone-less values over in the process-local offset; this undoes that.
//!
//! Rows are never modified in place; decorated copies are returned.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::catalog::ColumnMetadata;
use crate::record::{FieldValue, Record};

/// Format of the presentation form of a date.
pub const PRESENTATION_DATE_FORMAT: &str = "%Y-%m-%d";

/// Decorates `rows` for presentation (`true`) or wall-clock reads (`false`).
///
/// `columns` is only consulted in presentation mode.
pub fn decorate_rows(
    rows: &[Record],
    columns: &[ColumnMetadata],
    want_presentation_form: bool,
) -> Vec<Record> {
    if want_presentation_form {
        let date_columns: Vec<&str> = columns
            .iter()
            .filter(|column| column.is_date())
            .map(|column| column.name.as_str())
            .collect();
        rows.iter()
            .map(|row| present_dates(row, &date_columns))
            .collect()
    } else {
        rows.iter().map(normalize_timestamps).collect()
    }
}

fn present_dates(row: &Record, date_columns: &[&str]) -> Record {
    row.iter()
        .map(|(name, value)| {
            let value = if date_columns.contains(&name) {
                present_date(value)
            } else {
                value.clone()
            };
            (name, value)
        })
        .collect()
}

fn normalize_timestamps(row: &Record) -> Record {
    row.iter()
        .map(|(name, value)| {
            let value = match value {
                FieldValue::Timestamp(ts) => FieldValue::Timestamp(wall_clock_as_utc(ts)),
                other => other.clone(),
            };
            (name, value)
        })
        .collect()
}

/// Presentation string for a date-typed value; other values pass through.
pub fn present_date(value: &FieldValue) -> FieldValue {
    match value {
        FieldValue::Date(date) => FieldValue::Text(format_date(*date)),
        FieldValue::Timestamp(ts) => FieldValue::Text(format_date(ts.date_naive())),
        other => other.clone(),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(PRESENTATION_DATE_FORMAT).to_string()
}

/// Re-reads the wall-clock time of `ts` as a UTC instant.
pub fn wall_clock_as_utc(ts: &DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&ts.naive_local()).fixed_offset()
}
