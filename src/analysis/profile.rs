//! CSV profiling: encoding, delimiter, header and column type detection.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::json;
use thiserror::Error;

use super::values::{coerce, CellValue, ColumnType};
use crate::repository::TableColumn;

/// Delimiters considered by the detection heuristic.
const CANDIDATE_DELIMITERS: &[u8] = &[b',', b';', b'\t', b'|'];

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("empty file")]
    EmptyFile,
    #[error("uneven column count across rows")]
    UnevenColumns,
    #[error("{0}")]
    Cast(#[from] super::values::CoerceError),
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
}

/// The result of profiling one CSV file.
#[derive(Debug, Clone)]
pub struct CsvProfile {
    pub encoding: String,
    pub separator: char,
    /// Header strings, verbatim.
    pub header: Vec<String>,
    /// Inferred type per column, parallel to `header`.
    pub column_types: Vec<ColumnType>,
    /// Per-column statistics: cardinality, and min/max for numeric columns.
    pub stats: Vec<serde_json::Value>,
    pub total_lines: usize,
}

impl CsvProfile {
    /// Columns in materializer form.
    pub fn table_columns(&self) -> Vec<TableColumn> {
        self.header
            .iter()
            .zip(&self.column_types)
            .map(|(name, kind)| TableColumn {
                name: name.clone(),
                kind: *kind,
            })
            .collect()
    }

    /// The full profile blob stored in `tables_index.csv_detective`.
    pub fn to_json(&self) -> serde_json::Value {
        let columns: serde_json::Map<String, serde_json::Value> = self
            .header
            .iter()
            .zip(&self.column_types)
            .map(|(name, kind)| (name.clone(), json!({ "format": kind.as_str() })))
            .collect();
        let formats: serde_json::Map<String, serde_json::Value> = self
            .header
            .iter()
            .zip(&self.column_types)
            .map(|(name, kind)| (name.clone(), json!(kind.as_str())))
            .collect();
        let profile: serde_json::Map<String, serde_json::Value> = self
            .header
            .iter()
            .zip(&self.stats)
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect();
        json!({
            "encoding": self.encoding,
            "separator": self.separator.to_string(),
            "header": self.header,
            "columns": columns,
            "formats": formats,
            "profile": profile,
            "total_lines": self.total_lines,
        })
    }
}

/// Detect the encoding of raw bytes: BOM first, then UTF-8 validation, then
/// windows-1252 as the lossless fallback.
fn decode(raw: &[u8]) -> (String, String) {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(raw) {
        let (text, _, _) = encoding.decode(&raw[bom_len..]);
        return (text.into_owned(), encoding.name().to_lowercase());
    }
    match std::str::from_utf8(raw) {
        Ok(text) => (text.to_string(), "utf-8".to_string()),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(raw);
            (text.into_owned(), "windows-1252".to_string())
        }
    }
}

/// Pick the delimiter with a consistent, non-zero count across the first
/// lines; fall back to the one with the highest minimum count, then to a
/// comma. Quoted fields can skew individual counts, hence the two tiers.
fn detect_delimiter(text: &str) -> char {
    let lines: Vec<&str> = text.lines().filter(|l| !l.is_empty()).take(10).collect();

    let mut consistent_best: Option<(char, usize)> = None;
    let mut fallback_best: Option<(char, usize)> = None;
    for &d in CANDIDATE_DELIMITERS {
        let d = d as char;
        let counts: Vec<usize> = lines.iter().map(|l| l.matches(d).count()).collect();
        let min = counts.iter().min().copied().unwrap_or(0);
        if min == 0 {
            continue;
        }
        if counts.iter().all(|&c| c == counts[0])
            && consistent_best.map(|(_, c)| counts[0] > c).unwrap_or(true)
        {
            consistent_best = Some((d, counts[0]));
        }
        if fallback_best.map(|(_, c)| min > c).unwrap_or(true) {
            fallback_best = Some((d, min));
        }
    }
    consistent_best.or(fallback_best).map(|(d, _)| d).unwrap_or(',')
}

/// Profile a CSV file and parse every row, coercing cells to the inferred
/// column types.
pub fn profile_and_parse(path: &Path) -> Result<(CsvProfile, Vec<Vec<CellValue>>), ProfileError> {
    let raw = fs::read(path)?;
    if raw.is_empty() {
        return Err(ProfileError::EmptyFile);
    }

    let (text, encoding) = decode(&raw);
    let separator = detect_delimiter(&text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator as u8)
        .has_headers(true)
        .flexible(false)
        .from_reader(text.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| ProfileError::Parse(e.to_string()))?
        .iter()
        .map(String::from)
        .collect();
    if header.is_empty() || (header.len() == 1 && header[0].is_empty()) {
        return Err(ProfileError::EmptyFile);
    }

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| match e.kind() {
            csv::ErrorKind::UnequalLengths { .. } => ProfileError::UnevenColumns,
            _ => ProfileError::Parse(e.to_string()),
        })?;
        records.push(record.iter().map(String::from).collect());
    }

    let column_types: Vec<ColumnType> = (0..header.len())
        .map(|i| ColumnType::infer(records.iter().map(move |r| r[i].as_str())))
        .collect();

    let stats = column_stats(&header, &column_types, &records);

    let mut rows = Vec::with_capacity(records.len());
    for record in &records {
        let mut row = Vec::with_capacity(record.len());
        for (value, kind) in record.iter().zip(&column_types) {
            row.push(coerce(value, *kind)?);
        }
        rows.push(row);
    }

    let profile = CsvProfile {
        encoding,
        separator,
        header,
        column_types,
        stats,
        total_lines: rows.len(),
    };
    Ok((profile, rows))
}

fn column_stats(
    header: &[String],
    column_types: &[ColumnType],
    records: &[Vec<String>],
) -> Vec<serde_json::Value> {
    (0..header.len())
        .map(|i| {
            let values = || records.iter().map(|r| r[i].trim()).filter(|v| !v.is_empty());
            let cardinality = values().collect::<HashSet<_>>().len();
            match column_types[i] {
                ColumnType::Int | ColumnType::Float => {
                    let numbers: Vec<f64> = values()
                        .filter_map(|v| v.replace(',', ".").parse().ok())
                        .collect();
                    let min = numbers.iter().cloned().fold(f64::INFINITY, f64::min);
                    let max = numbers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                    if numbers.is_empty() {
                        json!({ "cardinality": cardinality })
                    } else {
                        json!({ "cardinality": cardinality, "min": min, "max": max })
                    }
                }
                _ => json!({ "cardinality": cardinality }),
            }
        })
        .collect()
}
