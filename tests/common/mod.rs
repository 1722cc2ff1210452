//! Shared fixtures for the end-to-end crawl and analysis tests.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use datacrawl::config::Settings;
use datacrawl::crawl::Crawler;
use datacrawl::models::Resource;
use datacrawl::monitor::Monitor;
use datacrawl::notifier::Notifier;
use datacrawl::repository::Db;
use rusqlite::params;
use tempfile::TempDir;
use uuid::Uuid;

pub const SIMPLE_CSV_CONTENT: &str = "code_insee,number\n95211,102\n36522,48";

pub struct TestContext {
    pub db: Db,
    pub db_path: PathBuf,
    pub settings: Arc<Settings>,
    _dir: TempDir,
}

/// Fresh database plus settings wired to the given webhook, tuned for
/// fast single-iteration runs.
pub fn setup(webhook_url: Option<String>) -> TestContext {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.db");
    let db = Db::open(&db_path).unwrap();
    let settings = Arc::new(Settings {
        database_url: db_path.display().to_string(),
        webhook_url,
        webhook_enabled: true,
        sleep_between_batches: 0.0,
        batch_size: 100,
        crawler_count: 4,
        check_timeout_seconds: 5,
        ..Default::default()
    });
    TestContext {
        db,
        db_path,
        settings,
        _dir: dir,
    }
}

pub fn crawler(ctx: &TestContext) -> Crawler {
    let notifier = Arc::new(Notifier::from_settings(&ctx.settings).unwrap());
    Crawler::new(ctx.db.clone(), ctx.settings.clone(), notifier, Monitor::new()).unwrap()
}

pub fn crawler_with_settings(ctx: &TestContext, settings: Settings) -> Crawler {
    let settings = Arc::new(settings);
    let notifier = Arc::new(Notifier::from_settings(&settings).unwrap());
    Crawler::new(ctx.db.clone(), settings, notifier, Monitor::new()).unwrap()
}

/// Insert a resource and clear the priority flag the upsert sets, so tests
/// control scheduling explicitly.
pub fn add_resource(ctx: &TestContext, url: &str) -> Resource {
    let resource_id = Uuid::new_v4();
    let catalog = ctx.db.catalog();
    catalog
        .upsert("dataset-1", &resource_id, url, None)
        .unwrap();
    let conn = rusqlite::Connection::open(&ctx.db_path).unwrap();
    conn.execute(
        "UPDATE catalog SET priority = 0 WHERE resource_id = ?1",
        params![resource_id.to_string()],
    )
    .unwrap();
    catalog.get(&resource_id).unwrap().unwrap()
}

pub fn set_priority(ctx: &TestContext, resource: &Resource) {
    let conn = rusqlite::Connection::open(&ctx.db_path).unwrap();
    conn.execute(
        "UPDATE catalog SET priority = 1 WHERE resource_id = ?1",
        params![resource.resource_id.to_string()],
    )
    .unwrap();
}

/// Insert a synthetic previous check, backdated as requested.
#[allow(clippy::too_many_arguments)]
pub fn fake_check(
    ctx: &TestContext,
    resource: &Resource,
    days_ago: f64,
    headers: &[(&str, &str)],
    checksum: Option<&str>,
    detected_last_modified_at: Option<DateTime<Utc>>,
) -> i64 {
    let created_at = Utc::now() - Duration::seconds((days_ago * 86_400.0) as i64);
    let header_map: std::collections::BTreeMap<String, String> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let conn = rusqlite::Connection::open(&ctx.db_path).unwrap();
    conn.execute(
        r#"
        INSERT INTO checks (resource_id, url, created_at, status, headers,
                            timeout, checksum, detected_last_modified_at)
        VALUES (?1, ?2, ?3, 200, ?4, 0, ?5, ?6)
        "#,
        params![
            resource.resource_id.to_string(),
            resource.url,
            created_at.to_rfc3339(),
            serde_json::to_string(&header_map).unwrap(),
            checksum,
            detected_last_modified_at.map(|dt| dt.to_rfc3339()),
        ],
    )
    .unwrap();
    conn.last_insert_rowid()
}

/// All PUT bodies the webhook received, in order.
pub async fn webhook_documents(server: &wiremock::MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "PUT")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

/// Count requests of one method seen by the mock origin.
pub async fn request_count(server: &wiremock::MockServer, method: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == method)
        .count()
}
