//! Check journal models.
//!
//! A `Check` is the immutable record of one probe attempt against a resource
//! URL. Rows are appended by the probe engine and enriched in place by the
//! analysis pipeline (checksum, mime type, parsing stamps), but never
//! superseded in the journal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which signal detected the last modification of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifiedSource {
    #[serde(rename = "last-modified-header")]
    LastModifiedHeader,
    #[serde(rename = "content-length-header")]
    ContentLengthHeader,
    #[serde(rename = "computed-checksum")]
    ComputedChecksum,
    #[serde(rename = "harvest-resource-metadata")]
    HarvestResourceMetadata,
}

impl ModifiedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastModifiedHeader => "last-modified-header",
            Self::ContentLengthHeader => "content-length-header",
            Self::ComputedChecksum => "computed-checksum",
            Self::HarvestResourceMetadata => "harvest-resource-metadata",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "last-modified-header" => Some(Self::LastModifiedHeader),
            "content-length-header" => Some(Self::ContentLengthHeader),
            "computed-checksum" => Some(Self::ComputedChecksum),
            "harvest-resource-metadata" => Some(Self::HarvestResourceMetadata),
            _ => None,
        }
    }
}

/// Captured response headers, keys lowercased at capture time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckHeaders(pub BTreeMap<String, String>);

impl CheckHeaders {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Content-Type media type with any parameters (charset etc.) stripped.
    pub fn content_type(&self) -> Option<String> {
        self.get("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Last-Modified parsed as an RFC 2822 / HTTP date, timezone kept.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.get("last-modified").and_then(parse_http_date)
    }
}

/// Parse an HTTP date header value. Accepts RFC 2822 (with numeric or named
/// zones, including the `GMT+1` variants some origins emit) and RFC 3339.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // "Thu, 09 Jan 2020 09:33:37 GMT+4": rfc2822 rejects the compound zone
    if let Some(idx) = value.rfind("GMT+").or_else(|| value.rfind("GMT-")) {
        let (head, zone) = value.split_at(idx);
        let hours: i32 = zone[4..].trim().parse().ok()?;
        let sign = if zone.as_bytes()[3] == b'+' { 1 } else { -1 };
        let rewritten = format!("{} {:+05}", head.trim_end(), sign * hours * 100);
        if let Ok(dt) = DateTime::parse_from_rfc2822(&rewritten) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    None
}

/// One row of the append-only check journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: i64,
    pub resource_id: Uuid,
    pub url: String,
    pub created_at: DateTime<Utc>,
    /// HTTP status of the final probe response; None on transport failure.
    pub status: Option<u16>,
    pub headers: CheckHeaders,
    pub timeout: bool,
    pub error: Option<String>,
    pub response_time_ms: Option<i64>,
    /// SHA-1 of the body, lowercase hex, when the body was downloaded.
    pub checksum: Option<String>,
    pub filesize: Option<i64>,
    pub mime_type: Option<String>,
    pub parsing_table: Option<String>,
    pub parsing_error: Option<String>,
    pub parsing_started_at: Option<DateTime<Utc>>,
    pub parsing_finished_at: Option<DateTime<Utc>>,
    pub detected_last_modified_at: Option<DateTime<Utc>>,
    pub detected_last_modified_source: Option<ModifiedSource>,
    pub deleted: bool,
}

impl Check {
    /// Whether the probed resource looks like CSV content worth analysing.
    pub fn looks_like_csv(&self) -> bool {
        let by_header = self
            .headers
            .content_type()
            .map(|ct| {
                matches!(
                    ct.as_str(),
                    "text/csv" | "application/csv" | "text/plain" | "text/comma-separated-values"
                )
            })
            .unwrap_or(false);
        let by_mime = self
            .mime_type
            .as_deref()
            .map(|m| m.contains("csv") || m == "text/plain")
            .unwrap_or(false);
        let by_url = self.url.split('?').next().unwrap_or("").ends_with(".csv");
        by_header || by_mime || by_url
    }
}

/// Fields under the probe engine's control when appending a check.
#[derive(Debug, Clone, Default)]
pub struct NewCheck {
    pub resource_id: Uuid,
    pub url: String,
    pub status: Option<u16>,
    pub headers: CheckHeaders,
    pub timeout: bool,
    pub error: Option<String>,
    pub response_time_ms: Option<i64>,
    pub detected_last_modified_at: Option<DateTime<Utc>>,
    pub detected_last_modified_source: Option<ModifiedSource>,
}
