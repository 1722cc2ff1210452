//! End-to-end crawl scenarios: scheduler, probe, change detection,
//! notifications, and the handoff into CSV analysis.

mod common;

use common::*;
use datacrawl::analysis::table_name_for_url;
use datacrawl::config::Settings;
use datacrawl::models::ResourceStatus;
use datacrawl::repository::CheckTarget;
use rusqlite::Connection;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn origin_with_csv(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/data.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", body.len().to_string().as_str())
                .insert_header("content-type", "text/csv"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.as_bytes().to_vec()))
        .mount(&server)
        .await;
    server
}

async fn webhook() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn happy_path_crawl_checks_analyses_and_notifies() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);

    crawler(&ctx).run(Some(1)).await.unwrap();

    // exactly one journal row, fingerprinted
    let checks = ctx.db.checks();
    let all = checks
        .get_all(&CheckTarget::ResourceId(&resource.resource_id))
        .unwrap();
    assert_eq!(all.len(), 1);
    let check = &all[0];
    assert_eq!(check.status, Some(200));
    assert!(check.checksum.is_some());
    assert_eq!(check.filesize, Some(SIMPLE_CSV_CONTENT.len() as i64));
    assert_eq!(check.mime_type.as_deref(), Some("text/plain"));
    assert_eq!(check.parsing_table.as_deref(), Some(table_name_for_url(&url).as_str()));
    assert!(check.parsing_error.is_none());

    // the downloaded file was fetched once and shared with parsing
    assert_eq!(request_count(&origin, "GET").await, 1);

    // two webhook PUTs: the check document and the analysis document
    let documents = webhook_documents(&webhook).await;
    assert_eq!(documents.len(), 2);
    assert_eq!(documents[0]["check:status"], 200);
    assert_eq!(documents[0]["check:available"], true);
    assert_eq!(documents[0]["check:timeout"], false);
    assert_eq!(documents[0]["check:headers:content-type"], "text/csv");
    assert_eq!(
        documents[1]["analysis:content-length"],
        SIMPLE_CSV_CONTENT.len() as i64
    );
    assert_eq!(documents[1]["analysis:mime-type"], "text/plain");
    assert!(documents[1]["analysis:parsing:started_at"].is_string());
    assert!(documents[1]["analysis:parsing:error"].is_null());

    // the materialized table has one row per CSV record, integers inferred
    let conn = Connection::open(&ctx.db_path).unwrap();
    let table = table_name_for_url(&url);
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
    let number: i64 = conn
        .query_row(
            &format!("SELECT \"number\" FROM \"{table}\" WHERE \"__id\" = 1"),
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(number, 102);

    // profile bookkeeping matches the table contents
    let index = ctx
        .db
        .tables()
        .get_index(&resource.resource_id)
        .unwrap()
        .unwrap();
    assert_eq!(index.table_name, table);
    assert_eq!(index.csv_detective["total_lines"], 2);
    assert_eq!(index.csv_detective["columns"]["number"]["format"], "int");

    // resource back to idle, priority spent
    let resource = ctx.db.catalog().get(&resource.resource_id).unwrap().unwrap();
    assert_eq!(resource.status, None);
    assert!(!resource.priority);
    assert!(resource.last_check_at.is_some());
}

#[tokio::test]
async fn oversized_resource_is_reported_not_parsed() {
    let big_body = "x".repeat(64 * 1024);
    let origin = origin_with_csv(&big_body).await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);

    let settings = Settings {
        max_filesize_allowed: 1024,
        ..(*ctx.settings).clone()
    };
    crawler_with_settings(&ctx, settings).run(Some(1)).await.unwrap();

    // the check is journaled
    let check = ctx
        .db
        .checks()
        .get_latest(&CheckTarget::ResourceId(&resource.resource_id))
        .unwrap()
        .unwrap();
    assert_eq!(check.status, Some(200));
    assert!(check.parsing_table.is_none());

    // the failure is announced
    let documents = webhook_documents(&webhook).await;
    let analysis = documents
        .iter()
        .find(|d| d.get("analysis:error").is_some())
        .expect("analysis error document");
    assert_eq!(analysis["analysis:error"], "File too large to download");
    assert!(analysis["analysis:content-length"].is_null());

    // no per-resource table was created
    let conn = Connection::open(&ctx.db_path).unwrap();
    let exists: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name_for_url(&url)],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(exists, 0);
}

#[tokio::test]
async fn excluded_pattern_suppresses_the_probe() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let ctx = setup(None);
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);
    set_priority(&ctx, &resource);

    let settings = Settings {
        excluded_patterns: vec!["%127.0.0.1%".to_string()],
        ..(*ctx.settings).clone()
    };
    crawler_with_settings(&ctx, settings).run(Some(1)).await.unwrap();

    assert_eq!(request_count(&origin, "HEAD").await, 0);
    assert_eq!(request_count(&origin, "GET").await, 0);
    assert!(ctx
        .db
        .checks()
        .get_latest(&CheckTarget::ResourceId(&resource.resource_id))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn pending_status_suppresses_the_probe_and_survives() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let ctx = setup(None);
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);
    set_priority(&ctx, &resource);
    ctx.db
        .catalog()
        .set_status(&resource.resource_id, Some(ResourceStatus::ToAnalyseResource))
        .unwrap();

    crawler(&ctx).run(Some(1)).await.unwrap();

    assert_eq!(request_count(&origin, "HEAD").await, 0);
    assert_eq!(request_count(&origin, "GET").await, 0);
    let resource = ctx.db.catalog().get(&resource.resource_id).unwrap().unwrap();
    assert_eq!(resource.status, Some(ResourceStatus::ToAnalyseResource));
}

#[tokio::test]
async fn backoff_resource_is_probed_and_cleared_on_success() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);
    set_priority(&ctx, &resource);
    ctx.db
        .catalog()
        .set_status(&resource.resource_id, Some(ResourceStatus::Backoff))
        .unwrap();

    crawler(&ctx).run(Some(1)).await.unwrap();

    assert_eq!(request_count(&origin, "HEAD").await, 1);
    let resource = ctx.db.catalog().get(&resource.resource_id).unwrap().unwrap();
    assert_eq!(resource.status, None);
}

#[tokio::test]
async fn rate_limited_probe_places_resource_in_backoff() {
    let origin = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&origin)
        .await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/throttled.csv", origin.uri());
    let resource = add_resource(&ctx, &url);

    crawler(&ctx).run(Some(1)).await.unwrap();

    let check = ctx
        .db
        .checks()
        .get_latest(&CheckTarget::ResourceId(&resource.resource_id))
        .unwrap()
        .unwrap();
    assert_eq!(check.status, Some(429));
    let resource = ctx.db.catalog().get(&resource.resource_id).unwrap().unwrap();
    assert_eq!(resource.status, Some(ResourceStatus::Backoff));

    // availability is unknown when the origin throttles us
    let documents = webhook_documents(&webhook).await;
    assert_eq!(documents[0]["check:available"], serde_json::Value::Null);
}

#[tokio::test]
async fn fresh_check_suppresses_the_probe() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let ctx = setup(None);
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);
    fake_check(&ctx, &resource, 1.0, &[], None, None);

    crawler(&ctx).run(Some(1)).await.unwrap();
    assert_eq!(request_count(&origin, "HEAD").await, 0);
}

#[tokio::test]
async fn outdated_check_triggers_a_probe() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);
    fake_check(&ctx, &resource, 52.0 * 7.0, &[], None, None);

    crawler(&ctx).run(Some(1)).await.unwrap();
    assert_eq!(request_count(&origin, "HEAD").await, 1);
    let all = ctx
        .db
        .checks()
        .get_all(&CheckTarget::ResourceId(&resource.resource_id))
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn recheck_delay_follows_the_remote_change_interval() {
    // modified 2 days ago, checked 1 day ago: not due
    {
        let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
        let ctx = setup(None);
        let url = format!("{}/data.csv", origin.uri());
        let resource = add_resource(&ctx, &url);
        fake_check(
            &ctx,
            &resource,
            1.0,
            &[],
            None,
            Some(chrono::Utc::now() - chrono::Duration::days(2)),
        );
        crawler(&ctx).run(Some(1)).await.unwrap();
        assert_eq!(request_count(&origin, "HEAD").await, 0);
    }
    // modified 1 day ago, checked 2 days ago: due
    {
        let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
        let ctx = setup(None);
        let url = format!("{}/data.csv", origin.uri());
        let resource = add_resource(&ctx, &url);
        fake_check(
            &ctx,
            &resource,
            2.0,
            &[],
            None,
            Some(chrono::Utc::now() - chrono::Duration::days(1)),
        );
        crawler(&ctx).run(Some(1)).await.unwrap();
        assert_eq!(request_count(&origin, "HEAD").await, 1);
    }
}

#[tokio::test]
async fn unchanged_last_modified_stays_silent_then_flip_notifies() {
    let date = "Thu, 09 Jan 2020 09:33:37 GMT";
    let webhook_server = webhook().await;

    // same header as the previous check: no notification, no download
    {
        let origin = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("last-modified", date)
                    .insert_header("content-length", "10"),
            )
            .mount(&origin)
            .await;
        let ctx = setup(Some(webhook_server.uri()));
        let url = format!("{}/", origin.uri());
        let resource = add_resource(&ctx, &url);
        fake_check(
            &ctx,
            &resource,
            10.0,
            &[("last-modified", date), ("content-length", "10")],
            None,
            None,
        );

        crawler(&ctx).run(Some(1)).await.unwrap();
        assert_eq!(request_count(&origin, "HEAD").await, 1);
        assert_eq!(request_count(&origin, "GET").await, 0);
        assert!(webhook_documents(&webhook_server).await.is_empty());
    }

    // a different header: notification with the header-based detection
    {
        let origin = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("last-modified", "Fri, 10 Jan 2020 09:33:37 GMT")
                    .insert_header("content-length", "10"),
            )
            .mount(&origin)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(SIMPLE_CSV_CONTENT.as_bytes().to_vec()),
            )
            .mount(&origin)
            .await;
        let ctx = setup(Some(webhook_server.uri()));
        let url = format!("{}/", origin.uri());
        let resource = add_resource(&ctx, &url);
        fake_check(
            &ctx,
            &resource,
            10.0,
            &[("last-modified", date), ("content-length", "10")],
            None,
            None,
        );

        crawler(&ctx).run(Some(1)).await.unwrap();
        let documents = webhook_documents(&webhook_server).await;
        assert!(!documents.is_empty());
        let analysis = documents.last().unwrap();
        assert_eq!(
            analysis["analysis:last-modified-detection"],
            "last-modified-header"
        );
        assert_eq!(
            analysis["analysis:last-modified-at"],
            "2020-01-10T09:33:37+00:00"
        );
    }
}

#[tokio::test]
async fn content_length_flip_detects_modification_now() {
    let origin = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-length", "15")
                .insert_header("content-type", "application/json"),
        )
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .mount(&origin)
        .await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/", origin.uri());
    let resource = add_resource(&ctx, &url);
    set_priority(&ctx, &resource);
    fake_check(
        &ctx,
        &resource,
        0.1,
        &[("content-length", "10"), ("content-type", "application/json")],
        None,
        None,
    );

    crawler(&ctx).run(Some(1)).await.unwrap();

    let documents = webhook_documents(&webhook).await;
    assert!(!documents.is_empty());
    assert_eq!(documents[0]["check:headers:content-length"], 15);
    let analysis = documents.last().unwrap();
    assert_eq!(
        analysis["analysis:last-modified-detection"],
        "content-length-header"
    );
    let detected: chrono::DateTime<chrono::Utc> = analysis["analysis:last-modified-at"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((chrono::Utc::now() - detected).num_seconds() < 30);
}

#[tokio::test]
async fn checksum_flip_detects_modification() {
    let origin = origin_with_csv(SIMPLE_CSV_CONTENT).await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/data.csv", origin.uri());
    let resource = add_resource(&ctx, &url);
    fake_check(
        &ctx,
        &resource,
        10.0,
        &[("content-type", "text/csv")],
        Some("136bd31d53340d234957650e042172705bf32984"),
        None,
    );

    crawler(&ctx).run(Some(1)).await.unwrap();

    let documents = webhook_documents(&webhook).await;
    let analysis = documents.last().unwrap();
    assert_eq!(
        analysis["analysis:last-modified-detection"],
        "computed-checksum"
    );
}

#[tokio::test]
async fn harvest_metadata_dates_the_modification() {
    let harvested: chrono::DateTime<chrono::Utc> =
        "2022-12-06T05:00:32.647+00:00".parse().unwrap();
    let origin = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-length", "2"))
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .mount(&origin)
        .await;
    let webhook = webhook().await;
    let ctx = setup(Some(webhook.uri()));
    let url = format!("{}/harvested", origin.uri());
    let resource = add_resource(&ctx, &url);
    let conn = Connection::open(&ctx.db_path).unwrap();
    conn.execute(
        "UPDATE catalog SET harvest_modified_at = ?1, priority = 1 WHERE resource_id = ?2",
        rusqlite::params![harvested.to_rfc3339(), resource.resource_id.to_string()],
    )
    .unwrap();
    fake_check(
        &ctx,
        &resource,
        10.0,
        &[("content-length", "2")],
        None,
        Some(chrono::Utc::now() - chrono::Duration::days(10)),
    );

    crawler(&ctx).run(Some(1)).await.unwrap();

    let documents = webhook_documents(&webhook).await;
    let analysis = documents.last().unwrap();
    assert_eq!(
        analysis["analysis:last-modified-detection"],
        "harvest-resource-metadata"
    );
    let detected: chrono::DateTime<chrono::Utc> = analysis["analysis:last-modified-at"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(detected, harvested);
}
