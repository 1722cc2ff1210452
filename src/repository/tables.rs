//! Bookkeeping for materialized per-resource tables.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::{parse_datetime, to_option, Db, Result};
use crate::models::{ResourceException, TableIndexEntry};

#[derive(Debug, Clone)]
pub struct TablesRepository {
    db: Db,
}

impl TablesRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Upsert the profile blob for a resource's table.
    pub fn upsert_index(
        &self,
        resource_id: &Uuid,
        table_name: &str,
        profile: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            r#"
            INSERT INTO tables_index (resource_id, table_name, csv_detective, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(resource_id) DO UPDATE SET
                table_name = excluded.table_name,
                csv_detective = excluded.csv_detective,
                created_at = excluded.created_at
            "#,
            params![
                resource_id.to_string(),
                table_name,
                serde_json::to_string(profile)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_index(&self, resource_id: &Uuid) -> Result<Option<TableIndexEntry>> {
        let conn = self.db.connect()?;
        to_option(conn.query_row(
            "SELECT resource_id, table_name, csv_detective, created_at
             FROM tables_index WHERE resource_id = ?1",
            params![resource_id.to_string()],
            |row| {
                let rid: String = row.get(0)?;
                let blob: String = row.get(2)?;
                Ok(TableIndexEntry {
                    resource_id: rid.parse().unwrap_or_else(|_| Uuid::nil()),
                    table_name: row.get(1)?,
                    csv_detective: serde_json::from_str(&blob)
                        .unwrap_or(serde_json::Value::Null),
                    created_at: parse_datetime(&row.get::<_, String>(3)?),
                })
            },
        ))
    }

    /// Exception row for a resource, when one exists.
    pub fn get_exception(&self, resource_id: &Uuid) -> Result<Option<ResourceException>> {
        let conn = self.db.connect()?;
        to_option(conn.query_row(
            "SELECT resource_id, table_indexes, max_size_allowed
             FROM resources_exceptions WHERE resource_id = ?1",
            params![resource_id.to_string()],
            |row| {
                let rid: String = row.get(0)?;
                let indexes: String = row.get(1)?;
                let max_size: Option<i64> = row.get(2)?;
                Ok(ResourceException {
                    resource_id: rid.parse().unwrap_or_else(|_| Uuid::nil()),
                    table_indexes: serde_json::from_str(&indexes).unwrap_or_default(),
                    max_size_allowed: max_size.map(|n| n as u64),
                })
            },
        ))
    }

    /// Register an exception for a resource already present in the catalog.
    pub fn insert_exception(&self, exception: &ResourceException) -> Result<()> {
        let conn = self.db.connect()?;
        let known: i64 = conn.query_row(
            "SELECT COUNT(*) FROM catalog WHERE resource_id = ?1 AND deleted = 0",
            params![exception.resource_id.to_string()],
            |r| r.get(0),
        )?;
        if known == 0 {
            return Err(super::RepositoryError::NotFound(format!(
                "resource {}",
                exception.resource_id
            )));
        }
        conn.execute(
            r#"
            INSERT INTO resources_exceptions (resource_id, table_indexes, max_size_allowed)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(resource_id) DO UPDATE SET
                table_indexes = excluded.table_indexes,
                max_size_allowed = excluded.max_size_allowed
            "#,
            params![
                exception.resource_id.to_string(),
                serde_json::to_string(&exception.table_indexes)?,
                exception.max_size_allowed.map(|n| n as i64),
            ],
        )?;
        Ok(())
    }
}
