//! Materialized-table bookkeeping models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per materialized per-resource table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableIndexEntry {
    pub resource_id: Uuid,
    pub table_name: String,
    /// Full profile blob: header, columns, formats, per-column statistics,
    /// total_lines.
    pub csv_detective: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Override row allowing otherwise-rejected resources.
///
/// `table_indexes` maps column names to an index kind, `"unique"` or
/// `"index"`, created after the table is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceException {
    pub resource_id: Uuid,
    pub table_indexes: BTreeMap<String, String>,
    /// Per-resource replacement for the global size cap, if any.
    pub max_size_allowed: Option<u64>,
}
