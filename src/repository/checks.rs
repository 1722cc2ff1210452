//! Append-only check journal.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{parse_datetime, parse_datetime_opt, to_option, Db, Result};
use crate::models::{Check, ModifiedSource, NewCheck};

/// Lookup key for journal queries: by URL or by resource id.
#[derive(Debug, Clone)]
pub enum CheckTarget<'a> {
    Url(&'a str),
    ResourceId(&'a Uuid),
}

/// Columns `get_group_by_for_date` may aggregate on. Identifiers cannot be
/// bound as parameters, so anything else is rejected.
pub const GROUP_BY_COLUMNS: &[&str] = &[
    "status",
    "error",
    "mime_type",
    "detected_last_modified_source",
    "parsing_error",
];

/// One bucket of a daily aggregate.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckAggregate {
    pub value: Option<String>,
    pub count: i64,
}

/// SQLite-backed journal of probe outcomes.
#[derive(Debug, Clone)]
pub struct CheckRepository {
    db: Db,
}

impl CheckRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn map_check(row: &Row<'_>) -> rusqlite::Result<Check> {
        let resource_id: String = row.get("resource_id")?;
        let headers: String = row.get("headers")?;
        let source: Option<String> = row.get("detected_last_modified_source")?;
        let status: Option<i64> = row.get("status")?;
        Ok(Check {
            id: row.get("id")?,
            resource_id: resource_id.parse().unwrap_or_else(|_| Uuid::nil()),
            url: row.get("url")?,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            status: status.map(|s| s as u16),
            headers: serde_json::from_str(&headers).unwrap_or_default(),
            timeout: row.get("timeout")?,
            error: row.get("error")?,
            response_time_ms: row.get("response_time_ms")?,
            checksum: row.get("checksum")?,
            filesize: row.get("filesize")?,
            mime_type: row.get("mime_type")?,
            parsing_table: row.get("parsing_table")?,
            parsing_error: row.get("parsing_error")?,
            parsing_started_at: parse_datetime_opt(row.get("parsing_started_at")?),
            parsing_finished_at: parse_datetime_opt(row.get("parsing_finished_at")?),
            detected_last_modified_at: parse_datetime_opt(
                row.get("detected_last_modified_at")?,
            ),
            detected_last_modified_source: source
                .as_deref()
                .and_then(ModifiedSource::from_str),
            deleted: row.get("deleted")?,
        })
    }

    /// Append a probe outcome. Returns the stored row.
    pub fn append(&self, new: &NewCheck) -> Result<Check> {
        let conn = self.db.connect()?;
        let created_at = Utc::now();
        conn.execute(
            r#"
            INSERT INTO checks (
                resource_id, url, created_at, status, headers, timeout, error,
                response_time_ms, detected_last_modified_at, detected_last_modified_source
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                new.resource_id.to_string(),
                new.url,
                created_at.to_rfc3339(),
                new.status.map(|s| s as i64),
                serde_json::to_string(&new.headers)?,
                new.timeout,
                new.error,
                new.response_time_ms,
                new.detected_last_modified_at.map(|dt| dt.to_rfc3339()),
                new.detected_last_modified_source.map(|s| s.as_str()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.get_by_id(id)?
            .ok_or_else(|| super::RepositoryError::NotFound(format!("check {id}")))
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Check>> {
        let conn = self.db.connect()?;
        to_option(conn.query_row(
            "SELECT * FROM checks WHERE id = ?1",
            params![id],
            Self::map_check,
        ))
    }

    /// Latest non-deleted check for the target.
    pub fn get_latest(&self, target: &CheckTarget<'_>) -> Result<Option<Check>> {
        let conn = self.db.connect()?;
        let (clause, value) = Self::target_clause(target);
        to_option(conn.query_row(
            &format!(
                "SELECT * FROM checks WHERE {clause} AND deleted = 0
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![value],
            Self::map_check,
        ))
    }

    /// Full non-deleted history for the target, newest first.
    pub fn get_all(&self, target: &CheckTarget<'_>) -> Result<Vec<Check>> {
        let conn = self.db.connect()?;
        let (clause, value) = Self::target_clause(target);
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM checks WHERE {clause} AND deleted = 0
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(params![value], Self::map_check)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The check immediately preceding `check` for the same `(url,
    /// resource_id)` pair.
    pub fn get_previous(&self, check: &Check) -> Result<Option<Check>> {
        let conn = self.db.connect()?;
        to_option(conn.query_row(
            r#"
            SELECT * FROM checks
            WHERE resource_id = ?1 AND url = ?2 AND deleted = 0 AND id != ?3
              AND (created_at < ?4 OR (created_at = ?4 AND id < ?3))
            ORDER BY created_at DESC, id DESC LIMIT 1
            "#,
            params![
                check.resource_id.to_string(),
                check.url,
                check.id,
                check.created_at.to_rfc3339(),
            ],
            Self::map_check,
        ))
    }

    /// Daily aggregate over one of the allow-listed columns.
    pub fn get_group_by_for_date(
        &self,
        column: &str,
        date: NaiveDate,
    ) -> Result<Vec<CheckAggregate>> {
        if !GROUP_BY_COLUMNS.contains(&column) {
            return Err(super::RepositoryError::NotFound(format!(
                "unknown group_by column: {column}"
            )));
        }
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT CAST({column} AS TEXT) AS value, COUNT(*) AS count
            FROM checks
            WHERE date(created_at) = ?1 AND deleted = 0
            GROUP BY {column}
            ORDER BY count DESC
            "#
        ))?;
        let rows = stmt.query_map(params![date.format("%Y-%m-%d").to_string()], |row| {
            Ok(CheckAggregate {
                value: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Stamp the moment CSV parsing started.
    pub fn stamp_parsing_started(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE checks SET parsing_started_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the parsing outcome: a table name on success, an error message
    /// on failure.
    pub fn stamp_parsing_finished(
        &self,
        id: i64,
        table: Option<&str>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            UPDATE checks
            SET parsing_table = ?2, parsing_error = ?3, parsing_finished_at = ?4
            WHERE id = ?1
            "#,
            params![id, table, error, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record the downloaded body's digest and content facts.
    pub fn update_content_facts(
        &self,
        id: i64,
        checksum: &str,
        filesize: i64,
        mime_type: &str,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE checks SET checksum = ?2, filesize = ?3, mime_type = ?4 WHERE id = ?1",
            params![id, checksum, filesize, mime_type],
        )?;
        Ok(())
    }

    /// Record which signal dated the latest modification.
    pub fn update_modified_detection(
        &self,
        id: i64,
        at: DateTime<Utc>,
        source: ModifiedSource,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            UPDATE checks
            SET detected_last_modified_at = ?2, detected_last_modified_source = ?3
            WHERE id = ?1
            "#,
            params![id, at.to_rfc3339(), source.as_str()],
        )?;
        Ok(())
    }

    fn target_clause(target: &CheckTarget<'_>) -> (&'static str, String) {
        match target {
            CheckTarget::Url(url) => ("url = ?1", url.to_string()),
            CheckTarget::ResourceId(id) => ("resource_id = ?1", id.to_string()),
        }
    }
}
