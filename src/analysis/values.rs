//! Column type lattice and value coercion for parsed CSV cells.
//!
//! The profiler infers one type per column; staging then coerces every cell
//! to that type. Coercion is tolerant where real-world catalogs are sloppy:
//! integer columns accept `"2.0"`, float columns accept comma decimals,
//! date columns accept locale-variant spellings.

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inferred type of a CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Date,
    Datetime,
    Json,
    String,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Json => "json",
            Self::String => "string",
        }
    }

    /// SQL column type emitted in the generated DDL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Int => "INTEGER",
            Self::Float => "REAL",
            Self::Bool => "BOOLEAN",
            Self::Date => "DATE",
            Self::Datetime => "TIMESTAMP",
            Self::Json => "JSON",
            Self::String => "TEXT",
        }
    }

    /// Candidate types tried during inference, most specific first.
    pub fn candidates() -> &'static [ColumnType] {
        &[
            Self::Int,
            Self::Float,
            Self::Bool,
            Self::Date,
            Self::Datetime,
            Self::Json,
        ]
    }

    /// Whether a raw cell satisfies this type.
    pub fn fits(&self, raw: &str) -> bool {
        let value = raw.trim();
        if value.is_empty() {
            return true;
        }
        match self {
            Self::Int => parse_int(value).is_some(),
            Self::Float => parse_float(value).is_some(),
            Self::Bool => value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("false"),
            Self::Date => parse_date(value).is_some(),
            Self::Datetime => parse_datetime(value).is_some(),
            Self::Json => {
                (value.starts_with('{') || value.starts_with('['))
                    && serde_json::from_str::<serde_json::Value>(value).is_ok()
            }
            Self::String => true,
        }
    }

    /// Infer the type of a column from its non-empty values: the most
    /// specific candidate every value satisfies, falling back to string.
    pub fn infer<'a>(values: impl Iterator<Item = &'a str> + Clone) -> ColumnType {
        for candidate in Self::candidates() {
            if values.clone().all(|v| candidate.fits(v)) {
                return *candidate;
            }
        }
        Self::String
    }
}

/// A coerced cell ready for parameter binding.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Datetime(NaiveDateTime),
    /// JSON kept as its textual form, never expanded.
    Json(String),
    Text(String),
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Self::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Self::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            Self::Date(v) => ToSqlOutput::Owned(Value::Text(v.format("%Y-%m-%d").to_string())),
            Self::Datetime(v) => {
                ToSqlOutput::Owned(Value::Text(v.format("%Y-%m-%d %H:%M:%S").to_string()))
            }
            Self::Json(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
            Self::Text(v) => ToSqlOutput::Owned(Value::Text(v.clone())),
        })
    }
}

#[derive(Error, Debug)]
#[error("cannot cast {value:?} as {kind}")]
pub struct CoerceError {
    pub value: String,
    pub kind: &'static str,
}

/// Coerce one raw cell to the column's inferred type. Empty cells become
/// NULL regardless of type.
pub fn coerce(raw: &str, kind: ColumnType) -> Result<CellValue, CoerceError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(CellValue::Null);
    }
    let error = || CoerceError {
        value: value.to_string(),
        kind: kind.as_str(),
    };
    match kind {
        ColumnType::Int => parse_int(value).map(CellValue::Int).ok_or_else(error),
        ColumnType::Float => parse_float(value).map(CellValue::Float).ok_or_else(error),
        ColumnType::Bool => {
            if value.eq_ignore_ascii_case("true") {
                Ok(CellValue::Bool(true))
            } else if value.eq_ignore_ascii_case("false") {
                Ok(CellValue::Bool(false))
            } else {
                Err(error())
            }
        }
        ColumnType::Date => parse_date(value).map(CellValue::Date).ok_or_else(error),
        ColumnType::Datetime => parse_datetime(value)
            .map(CellValue::Datetime)
            .ok_or_else(error),
        ColumnType::Json => {
            serde_json::from_str::<serde_json::Value>(value).map_err(|_| error())?;
            Ok(CellValue::Json(value.to_string()))
        }
        ColumnType::String => Ok(CellValue::Text(value.to_string())),
    }
}

/// Integers, plus float spellings with a zero fractional part (`"2.0"`).
fn parse_int(value: &str) -> Option<i64> {
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let normalized = normalize_decimal(value)?;
    let f: f64 = normalized.parse().ok()?;
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Floats with either a dot or a comma decimal separator.
fn parse_float(value: &str) -> Option<f64> {
    normalize_decimal(value)?.parse().ok()
}

/// Rewrite a single comma decimal separator to a dot; reject anything that
/// is not a plain decimal number.
fn normalize_decimal(value: &str) -> Option<String> {
    let candidate = if value.matches(',').count() == 1 && !value.contains('.') {
        value.replacen(',', ".", 1)
    } else {
        value.to_string()
    };
    let trimmed = candidate.strip_prefix(['-', '+']).unwrap_or(&candidate);
    if !trimmed.is_empty()
        && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.')
        && trimmed.matches('.').count() <= 1
    {
        Some(candidate)
    } else {
        None
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%Y-%d-%m",
    "%Y/%m/%d",
    "%d %m %Y",
];

const TIME_SUFFIXES: &[&str] = &[" %H:%M:%S", "T%H:%M:%S", " %H:%M"];

/// Month names recognized during date normalization, English and French.
const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("janvier", 1),
    ("fevrier", 2),
    ("février", 2),
    ("mars", 3),
    ("avril", 4),
    ("mai", 5),
    ("juin", 6),
    ("juillet", 7),
    ("aout", 8),
    ("août", 8),
    ("septembre", 9),
    ("octobre", 10),
    ("novembre", 11),
    ("decembre", 12),
    ("décembre", 12),
];

/// Replace a spelled-out month with its number and strip ordinal suffixes,
/// so `"31st december 2022"` and `"31 décembre 2022"` both become
/// `"31 12 2022"`.
fn normalize_month_names(value: &str) -> Option<String> {
    let lower = value.to_lowercase();
    let mut out: Vec<String> = Vec::new();
    let mut replaced = false;
    for token in lower.split_whitespace() {
        let token = token.trim_matches(',');
        if let Some((_, month)) = MONTHS.iter().find(|(name, _)| *name == token) {
            out.push(month.to_string());
            replaced = true;
            continue;
        }
        let stripped = token
            .strip_suffix("st")
            .or_else(|| token.strip_suffix("nd"))
            .or_else(|| token.strip_suffix("rd"))
            .or_else(|| token.strip_suffix("th"))
            .filter(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
        out.push(stripped.unwrap_or(token).to_string());
    }
    if replaced {
        Some(out.join(" "))
    } else {
        None
    }
}

/// Tolerant date parser: ISO and common numeric layouts, plus spelled-out
/// English/French months.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    if let Some(normalized) = normalize_month_names(value) {
        for format in ["%d %m %Y", "%m %d %Y", "%Y %m %d"] {
            if let Ok(date) = NaiveDate::parse_from_str(&normalized, format) {
                return Some(date);
            }
        }
    }
    None
}

/// Tolerant datetime parser over the same date layouts.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    for date_format in DATE_FORMATS {
        for suffix in TIME_SUFFIXES {
            let format = format!("{date_format}{suffix}");
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, &format) {
                return Some(dt);
            }
        }
    }
    None
}
