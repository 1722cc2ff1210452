//! Repository layer for database persistence.

mod catalog;
mod checks;
mod materialize;
mod tables;

pub use catalog::{CatalogRepository, DueCandidate};
pub use checks::{CheckAggregate, CheckRepository, CheckTarget, GROUP_BY_COLUMNS};
pub use materialize::{quote_ident, safe_column_name, TableColumn, TableMaterializer};
pub use tables::TablesRepository;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Convert a rusqlite Result<T> to Result<Option<T>>, treating QueryReturnedNoRows as None.
pub fn to_option<T>(result: rusqlite::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Create a database connection with settings suited for one writer plus
/// concurrent readers.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        PRAGMA cache_size = -64000;
        PRAGMA temp_store = MEMORY;
    "#,
    )?;

    Ok(conn)
}

/// Shared handle to the database used by every repository.
///
/// Connections are opened per operation; WAL keeps readers and the single
/// writer out of each other's way. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Db {
    db_path: PathBuf,
}

impl Db {
    /// Open the database, creating every table the service owns.
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Self {
            db_path: db_path.to_path_buf(),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        connect(&self.db_path)
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.clone())
    }

    pub fn checks(&self) -> CheckRepository {
        CheckRepository::new(self.clone())
    }

    pub fn tables(&self) -> TablesRepository {
        TablesRepository::new(self.clone())
    }

    pub fn materializer(&self) -> TableMaterializer {
        TableMaterializer::new(self.clone())
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            -- Authoritative list of resources to crawl
            CREATE TABLE IF NOT EXISTS catalog (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dataset_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                url TEXT NOT NULL,
                harvest_modified_at TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                deleted INTEGER NOT NULL DEFAULT 0,
                status TEXT,
                last_check_at TEXT,

                UNIQUE(dataset_id, resource_id)
            );

            -- Append-only journal of probe outcomes
            CREATE TABLE IF NOT EXISTS checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                status INTEGER,
                headers TEXT NOT NULL DEFAULT '{}',
                timeout INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                response_time_ms INTEGER,
                checksum TEXT,
                filesize INTEGER,
                mime_type TEXT,
                parsing_table TEXT,
                parsing_error TEXT,
                parsing_started_at TEXT,
                parsing_finished_at TEXT,
                detected_last_modified_at TEXT,
                detected_last_modified_source TEXT,
                deleted INTEGER NOT NULL DEFAULT 0
            );

            -- One row per materialized per-resource table
            CREATE TABLE IF NOT EXISTS tables_index (
                resource_id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                csv_detective TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            -- Oversize overrides with optional index specifications
            CREATE TABLE IF NOT EXISTS resources_exceptions (
                resource_id TEXT PRIMARY KEY,
                table_indexes TEXT NOT NULL DEFAULT '{}',
                max_size_allowed INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_catalog_resource
                ON catalog(resource_id);
            CREATE INDEX IF NOT EXISTS idx_catalog_due
                ON catalog(deleted, status, priority);
            CREATE INDEX IF NOT EXISTS idx_checks_resource
                ON checks(resource_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_checks_url
                ON checks(url, created_at);
            CREATE INDEX IF NOT EXISTS idx_checks_created
                ON checks(created_at);
        "#,
        )?;
        Ok(())
    }
}
