//! Catalog repository: the authoritative list of resources to crawl.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{parse_datetime_opt, to_option, Db, Result};
use crate::models::{Resource, ResourceStatus};

/// A resource eligible for a check, joined with its latest check metadata
/// so the freshness rule can run without a second round trip.
#[derive(Debug, Clone)]
pub struct DueCandidate {
    pub resource: Resource,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_detected_modified_at: Option<DateTime<Utc>>,
}

/// SQLite-backed catalog store.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    db: Db,
}

impl CatalogRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn map_resource(row: &Row<'_>) -> rusqlite::Result<Resource> {
        let resource_id: String = row.get("resource_id")?;
        let status: Option<String> = row.get("status")?;
        Ok(Resource {
            id: row.get("id")?,
            dataset_id: row.get("dataset_id")?,
            resource_id: resource_id.parse().unwrap_or_else(|_| Uuid::nil()),
            url: row.get("url")?,
            harvest_modified_at: parse_datetime_opt(row.get("harvest_modified_at")?),
            priority: row.get("priority")?,
            deleted: row.get("deleted")?,
            status: status.as_deref().and_then(ResourceStatus::from_str),
            last_check_at: parse_datetime_opt(row.get("last_check_at")?),
        })
    }

    /// Insert a resource, or revive/update it when the `(dataset_id,
    /// resource_id)` pair is already known. Always marks it priority so the
    /// next cycle picks it up.
    pub fn upsert(
        &self,
        dataset_id: &str,
        resource_id: &Uuid,
        url: &str,
        harvest_modified_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            INSERT INTO catalog (dataset_id, resource_id, url, harvest_modified_at, priority, deleted)
            VALUES (?1, ?2, ?3, ?4, 1, 0)
            ON CONFLICT(dataset_id, resource_id) DO UPDATE SET
                url = excluded.url,
                harvest_modified_at = COALESCE(excluded.harvest_modified_at, harvest_modified_at),
                priority = 1,
                deleted = 0
            "#,
            params![
                dataset_id,
                resource_id.to_string(),
                url,
                harvest_modified_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Bootstrap insert that leaves priority unset and skips known resources.
    pub fn insert_if_absent(
        &self,
        dataset_id: &str,
        resource_id: &Uuid,
        url: &str,
        harvest_modified_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let conn = self.db.connect()?;
        let inserted = conn.execute(
            r#"
            INSERT INTO catalog (dataset_id, resource_id, url, harvest_modified_at, priority, deleted)
            VALUES (?1, ?2, ?3, ?4, 0, 0)
            ON CONFLICT(dataset_id, resource_id) DO NOTHING
            "#,
            params![
                dataset_id,
                resource_id.to_string(),
                url,
                harvest_modified_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn get(&self, resource_id: &Uuid) -> Result<Option<Resource>> {
        let conn = self.db.connect()?;
        to_option(conn.query_row(
            "SELECT * FROM catalog WHERE resource_id = ?1 AND deleted = 0",
            params![resource_id.to_string()],
            Self::map_resource,
        ))
    }

    /// Mark a resource deleted. Returns false when it was not found.
    pub fn soft_delete(&self, resource_id: &Uuid) -> Result<bool> {
        let conn = self.db.connect()?;
        let n = conn.execute(
            "UPDATE catalog SET deleted = 1 WHERE resource_id = ?1 AND deleted = 0",
            params![resource_id.to_string()],
        )?;
        Ok(n > 0)
    }

    /// Set or clear the pipeline status of a resource.
    pub fn set_status(&self, resource_id: &Uuid, status: Option<ResourceStatus>) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE catalog SET status = ?2 WHERE resource_id = ?1",
            params![resource_id.to_string(), status.map(|s| s.as_str())],
        )?;
        Ok(())
    }

    /// Clear the one-shot priority flag and stamp the check time after a
    /// successful probe.
    pub fn mark_checked(&self, resource_id: &Uuid, at: DateTime<Utc>) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE catalog SET priority = 0, last_check_at = ?2 WHERE resource_id = ?1",
            params![resource_id.to_string(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Resources eligible for a check this cycle, joined with their latest
    /// non-deleted check. Exclusion patterns apply SQL LIKE semantics. The
    /// freshness rule itself runs on the caller's side; this query only
    /// removes resources that can never be due (deleted, pending status,
    /// excluded URL).
    ///
    /// Ordering: priority first, then never-checked, then idle before
    /// backoff, oldest check first.
    pub fn due_candidates(
        &self,
        limit: usize,
        excluded_patterns: &[String],
    ) -> Result<Vec<DueCandidate>> {
        let conn = self.db.connect()?;

        let mut sql = String::from(
            r#"
            SELECT c.*, latest.created_at AS check_created_at,
                   latest.detected_last_modified_at AS check_modified_at
            FROM catalog c
            LEFT JOIN (
                SELECT resource_id, url, MAX(created_at) AS created_at,
                       detected_last_modified_at
                FROM checks
                WHERE deleted = 0
                GROUP BY resource_id, url
            ) latest ON latest.resource_id = c.resource_id AND latest.url = c.url
            WHERE c.deleted = 0
              AND (c.status IS NULL OR c.status = 'BACKOFF')
            "#,
        );
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        for pattern in excluded_patterns {
            sql.push_str(&format!(
                " AND c.url NOT LIKE ?{}",
                params_vec.len() + 1
            ));
            params_vec.push(Box::new(pattern.clone()));
        }
        sql.push_str(&format!(
            r#"
            ORDER BY c.priority DESC,
                     latest.created_at IS NOT NULL,
                     c.status IS NOT NULL,
                     latest.created_at ASC
            LIMIT ?{}
            "#,
            params_vec.len() + 1
        ));
        params_vec.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|p| p.as_ref())),
            |row| {
                let resource = Self::map_resource(row)?;
                let last_check_at: Option<String> = row.get("check_created_at")?;
                let last_modified: Option<String> = row.get("check_modified_at")?;
                Ok(DueCandidate {
                    resource,
                    last_check_at: parse_datetime_opt(last_check_at),
                    last_detected_modified_at: parse_datetime_opt(last_modified),
                })
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count non-deleted resources currently in each pipeline status.
    pub fn status_counts(&self) -> Result<Vec<(Option<String>, i64)>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM catalog WHERE deleted = 0 GROUP BY status",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM catalog WHERE deleted = 0", [], |r| {
            r.get(0)
        })?)
    }
}
