//! Catalog resource model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline state of a catalog resource.
///
/// A resource with no status is idle. Only idle and `Backoff` resources are
/// eligible for a probe; every other state marks a step in flight and is
/// cleared back to idle when that step resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Backoff,
    CrawlingUrl,
    ToAnalyseResource,
    AnalysingResource,
    ToAnalyseCsv,
    AnalysingCsv,
    InsertingInDb,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backoff => "BACKOFF",
            Self::CrawlingUrl => "CRAWLING_URL",
            Self::ToAnalyseResource => "TO_ANALYSE_RESOURCE",
            Self::AnalysingResource => "ANALYSING_RESOURCE",
            Self::ToAnalyseCsv => "TO_ANALYSE_CSV",
            Self::AnalysingCsv => "ANALYSING_CSV",
            Self::InsertingInDb => "INSERTING_IN_DB",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "BACKOFF" => Some(Self::Backoff),
            "CRAWLING_URL" => Some(Self::CrawlingUrl),
            "TO_ANALYSE_RESOURCE" => Some(Self::ToAnalyseResource),
            "ANALYSING_RESOURCE" => Some(Self::AnalysingResource),
            "TO_ANALYSE_CSV" => Some(Self::ToAnalyseCsv),
            "ANALYSING_CSV" => Some(Self::AnalysingCsv),
            "INSERTING_IN_DB" => Some(Self::InsertingInDb),
            _ => None,
        }
    }

    /// Human-readable description for the status endpoint.
    pub fn verbose(status: Option<Self>) -> &'static str {
        match status {
            None => "never checked or not currently being checked",
            Some(Self::Backoff) => "backoff mode for this resource, will be checked later",
            Some(Self::CrawlingUrl) => "resource URL currently being crawled",
            Some(Self::ToAnalyseResource) => "resource waiting for content analysis",
            Some(Self::AnalysingResource) => "resource content currently being analysed",
            Some(Self::ToAnalyseCsv) => "CSV content waiting for analysis",
            Some(Self::AnalysingCsv) => "CSV content currently being analysed",
            Some(Self::InsertingInDb) => "parsed rows currently being inserted",
        }
    }

    /// Whether a resource in this state may be picked up by the scheduler.
    pub fn is_checkable(status: Option<Self>) -> bool {
        matches!(status, None | Some(Self::Backoff))
    }
}

/// A row in the catalog: one URL belonging to a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Database row ID.
    pub id: i64,
    pub dataset_id: String,
    pub resource_id: Uuid,
    pub url: String,
    /// Modification timestamp reported by the upstream harvester, if any.
    pub harvest_modified_at: Option<DateTime<Utc>>,
    /// One-shot flag forcing the next scheduling cycle to pick this resource.
    pub priority: bool,
    /// Soft-delete tombstone.
    pub deleted: bool,
    pub status: Option<ResourceStatus>,
    pub last_check_at: Option<DateTime<Utc>>,
}
