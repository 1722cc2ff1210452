//! Resource content analysis pipeline.
//!
//! After a probe detects change, the resource body is downloaded under a
//! size cap and fingerprinted (SHA-1, size, mime). Bodies that look like
//! CSV are then profiled and materialized into a per-resource table named
//! after the URL's md5.

mod download;
mod profile;
mod values;

pub use download::{download_to_tempfile, DownloadError};
pub use profile::{profile_and_parse, CsvProfile, ProfileError};
pub use values::{coerce, parse_date, parse_datetime, CellValue, CoerceError, ColumnType};

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::config::Settings;
use crate::crawl::checksum_detection;
use crate::models::{Check, ResourceStatus};
use crate::notifier::{Document, Notify};
use crate::repository::Db;

/// Name of the per-resource table: md5 of the URL, lowercase hex.
pub fn table_name_for_url(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Content fingerprint of a downloaded file.
struct ContentFacts {
    checksum: String,
    filesize: i64,
    mime_type: &'static str,
}

/// Stream a file once, computing its SHA-1 and sniffing a mime type from
/// the first chunk.
fn content_facts(path: &Path) -> std::io::Result<ContentFacts> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut sample: Option<Vec<u8>> = None;
    let mut size: u64 = 0;
    let mut buf = vec![0u8; 65_536];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        if sample.is_none() {
            sample = Some(buf[..read].to_vec());
        }
        hasher.update(&buf[..read]);
        size += read as u64;
    }
    Ok(ContentFacts {
        checksum: hex::encode(hasher.finalize()),
        filesize: size as i64,
        mime_type: sniff_mime(sample.as_deref().unwrap_or_default()),
    })
}

/// Text vs JSON vs binary, from a leading sample. CSV bodies deliberately
/// come out as `text/plain`; the CSV decision also weighs headers and the
/// URL extension.
fn sniff_mime(sample: &[u8]) -> &'static str {
    match std::str::from_utf8(sample) {
        Ok(text) => {
            let trimmed = text.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && serde_json::from_str::<serde_json::Value>(text.trim()).is_ok()
            {
                "application/json"
            } else {
                "text/plain"
            }
        }
        Err(_) => {
            if sample.contains(&0) {
                "application/octet-stream"
            } else {
                // undecoded single-byte text, e.g. latin-1 CSVs
                "text/plain"
            }
        }
    }
}

/// Runs resource and CSV analysis against the journal and catalog.
#[derive(Clone)]
pub struct Analyzer {
    db: Db,
    settings: Arc<Settings>,
    notifier: Arc<dyn Notify>,
    client: reqwest::Client,
}

impl Analyzer {
    pub fn new(
        db: Db,
        settings: Arc<Settings>,
        notifier: Arc<dyn Notify>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            db,
            settings,
            notifier,
            client,
        }
    }

    /// Per-resource size cap: the global cap, lifted (or replaced) by an
    /// exception row.
    fn size_cap(&self, resource_id: &Uuid) -> u64 {
        match self.db.tables().get_exception(resource_id) {
            Ok(Some(exception)) => exception.max_size_allowed.unwrap_or(u64::MAX),
            Ok(None) => self.settings.max_filesize_allowed,
            Err(e) => {
                tracing::error!(%resource_id, error = %e, "exception lookup failed");
                self.settings.max_filesize_allowed
            }
        }
    }

    /// Full analysis of the resource behind a check: download, fingerprint,
    /// change gate on the checksum, optional CSV materialization, one
    /// notification.
    ///
    /// `force` skips the unchanged-checksum short-circuit; it is set for the
    /// first check of a resource and for explicitly forced analyses.
    pub async fn analyse_resource(&self, check_id: i64, force: bool) -> anyhow::Result<()> {
        let checks = self.db.checks();
        let catalog = self.db.catalog();
        let check = checks
            .get_by_id(check_id)?
            .ok_or_else(|| anyhow::anyhow!("check {check_id} not found"))?;
        let resource = catalog.get(&check.resource_id)?;

        if resource.is_some() {
            catalog.set_status(&check.resource_id, Some(ResourceStatus::AnalysingResource))?;
        }
        let result = self.analyse_resource_inner(&check, force).await;
        if resource.is_some() {
            catalog.set_status(&check.resource_id, None)?;
        }
        result
    }

    async fn analyse_resource_inner(&self, check: &Check, force: bool) -> anyhow::Result<()> {
        let checks = self.db.checks();
        let cap = self.size_cap(&check.resource_id);
        let dataset_id = self
            .db
            .catalog()
            .get(&check.resource_id)?
            .map(|r| r.dataset_id);

        let (file, _size) =
            match download_to_tempfile(&self.client, &check.url, cap).await {
                Ok(ok) => ok,
                Err(DownloadError::TooLarge) => {
                    let mut document = Document::new();
                    document
                        .set("analysis:error", DownloadError::TooLarge.to_string())
                        .set("analysis:content-length", serde_json::Value::Null)
                        .set("analysis:mime-type", serde_json::Value::Null);
                    self.notifier
                        .notify(dataset_id.as_deref(), &check.resource_id, document)
                        .await;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

        let facts = content_facts(file.path())?;
        checks.update_content_facts(check.id, &facts.checksum, facts.filesize, facts.mime_type)?;

        let previous = checks.get_previous(check)?;
        let unchanged = previous
            .as_ref()
            .and_then(|p| p.checksum.as_deref())
            .map(|c| c == facts.checksum)
            .unwrap_or(false);
        if unchanged && !force {
            return Ok(());
        }

        if check.detected_last_modified_at.is_none() {
            if let Some(detection) =
                checksum_detection(&facts.checksum, previous.as_ref(), Utc::now())
            {
                checks.update_modified_detection(check.id, detection.at, detection.source)?;
            }
        }

        // reload for the detection stamped either here or at probe time
        let check = checks
            .get_by_id(check.id)?
            .ok_or_else(|| anyhow::anyhow!("check {} vanished", check.id))?;

        let mut document = Document::new();
        document
            .set("analysis:error", serde_json::Value::Null)
            .set("analysis:content-length", facts.filesize)
            .set("analysis:mime-type", facts.mime_type);
        if let Some(at) = check.detected_last_modified_at {
            document.set("analysis:last-modified-at", at.to_rfc3339());
        }
        if let Some(source) = check.detected_last_modified_source {
            document.set("analysis:last-modified-detection", source.as_str());
        }

        // every undifferentiated text body is given to the CSV stage (a
        // profiler failure is recorded, not fatal); JSON bodies are not CSV
        // no matter what the origin's headers claim
        let is_csv = facts.mime_type == "text/plain"
            || (facts.mime_type != "application/json" && check.looks_like_csv());
        if is_csv && self.settings.csv_analysis_enabled {
            self.csv_stage(&check, file.path(), &mut document).await?;
        }

        self.notifier
            .notify(dataset_id.as_deref(), &check.resource_id, document)
            .await;
        Ok(())
    }

    /// Standalone CSV analysis of an existing check: downloads the body and
    /// runs the parsing stage, then notifies the parsing outcome.
    pub async fn analyse_csv_check(&self, check_id: i64) -> anyhow::Result<()> {
        let checks = self.db.checks();
        let catalog = self.db.catalog();
        let check = checks
            .get_by_id(check_id)?
            .ok_or_else(|| anyhow::anyhow!("check {check_id} not found"))?;
        let resource = catalog.get(&check.resource_id)?;
        let dataset_id = resource.as_ref().map(|r| r.dataset_id.clone());

        let cap = self.size_cap(&check.resource_id);
        let (file, _size) = download_to_tempfile(&self.client, &check.url, cap).await?;

        if resource.is_some() {
            catalog.set_status(&check.resource_id, Some(ResourceStatus::ToAnalyseCsv))?;
        }
        let mut document = Document::new();
        let result = self.csv_stage(&check, file.path(), &mut document).await;
        if resource.is_some() {
            catalog.set_status(&check.resource_id, None)?;
        }
        result?;

        self.notifier
            .notify(dataset_id.as_deref(), &check.resource_id, document)
            .await;
        Ok(())
    }

    /// CSV analysis of a bare URL with no catalog entry: the table is still
    /// materialized under the URL's md5, without journal or index rows.
    pub async fn analyse_csv_url(&self, url: &str) -> anyhow::Result<()> {
        let (file, _size) =
            download_to_tempfile(&self.client, url, self.settings.max_filesize_allowed).await?;
        let (profile, rows) = profile_and_parse(file.path())
            .map_err(|e| anyhow::anyhow!("csv_detective:{e}"))?;
        self.db
            .materializer()
            .replace_table(&table_name_for_url(url), &profile.table_columns(), &rows)?;
        Ok(())
    }

    /// Profile, materialize, index. Parsing stamps land on the check, and
    /// `analysis:parsing:*` keys land in `document` for the caller's
    /// notification.
    async fn csv_stage(
        &self,
        check: &Check,
        path: &Path,
        document: &mut Document,
    ) -> anyhow::Result<()> {
        let checks = self.db.checks();
        let catalog = self.db.catalog();

        let started_at = Utc::now();
        checks.stamp_parsing_started(check.id, started_at)?;
        catalog.set_status(&check.resource_id, Some(ResourceStatus::AnalysingCsv))?;
        document.set("analysis:parsing:started_at", started_at.to_rfc3339());

        let parsed = profile_and_parse(path);
        let finished_at = Utc::now();
        match parsed {
            Err(e) => {
                let message = format!("csv_detective:{e}");
                checks.stamp_parsing_finished(check.id, None, Some(&message), finished_at)?;
                document
                    .set("analysis:parsing:finished_at", finished_at.to_rfc3339())
                    .set("analysis:parsing:error", message);
                Ok(())
            }
            Ok((profile, rows)) => {
                catalog.set_status(&check.resource_id, Some(ResourceStatus::InsertingInDb))?;
                let table_name = table_name_for_url(&check.url);
                let materializer = self.db.materializer();
                match materializer.replace_table(&table_name, &profile.table_columns(), &rows) {
                    Err(e) => {
                        // transaction rolled back; any previous table survives
                        let message = format!("load error: {e}");
                        checks.stamp_parsing_finished(
                            check.id,
                            None,
                            Some(&message),
                            Utc::now(),
                        )?;
                        document
                            .set("analysis:parsing:finished_at", Utc::now().to_rfc3339())
                            .set("analysis:parsing:error", message);
                        Ok(())
                    }
                    Ok(()) => {
                        if let Ok(Some(exception)) =
                            self.db.tables().get_exception(&check.resource_id)
                        {
                            materializer
                                .create_exception_indexes(&table_name, &exception.table_indexes)?;
                        }
                        self.db.tables().upsert_index(
                            &check.resource_id,
                            &table_name,
                            &profile.to_json(),
                        )?;
                        let finished_at = Utc::now();
                        checks.stamp_parsing_finished(
                            check.id,
                            Some(&table_name),
                            None,
                            finished_at,
                        )?;
                        document
                            .set("analysis:parsing:finished_at", finished_at.to_rfc3339())
                            .set("analysis:parsing:error", serde_json::Value::Null);
                        Ok(())
                    }
                }
            }
        }
    }
}
