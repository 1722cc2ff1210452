//! Scheduler and crawler control loop.
//!
//! Each iteration pulls the due slice of the catalog, probes resources on a
//! bounded worker pool, journals every outcome, and hands changed resources
//! to the analysis pipeline. Per-resource failures are logged and never
//! stop the loop.

mod change;
mod probe;

pub use change::{
    analyze_change, checksum_detection, is_due, ChangeAnalysis, Detection,
};
pub use probe::{ProbeEngine, ProbeResult};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::analysis::Analyzer;
use crate::config::Settings;
use crate::models::{Check, NewCheck, Resource, ResourceStatus};
use crate::monitor::Monitor;
use crate::notifier::{Document, Notify};
use crate::repository::Db;

/// The crawling service: scheduler loop plus single-resource checks.
#[derive(Clone)]
pub struct Crawler {
    db: Db,
    settings: Arc<Settings>,
    probe: ProbeEngine,
    analyzer: Analyzer,
    notifier: Arc<dyn Notify>,
    monitor: Monitor,
    stop: Arc<AtomicBool>,
}

impl Crawler {
    pub fn new(
        db: Db,
        settings: Arc<Settings>,
        notifier: Arc<dyn Notify>,
        monitor: Monitor,
    ) -> anyhow::Result<Self> {
        let probe = ProbeEngine::new(
            &settings.user_agent,
            Duration::from_secs(settings.check_timeout_seconds),
        )?;
        let analyzer = Analyzer::new(
            db.clone(),
            settings.clone(),
            notifier.clone(),
            probe.client().clone(),
        );
        Ok(Self {
            db,
            settings,
            probe,
            analyzer,
            notifier,
            monitor,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle that cancels the loop: in-flight probes finish, pending ones
    /// are discarded.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Run the scheduler loop, forever or for a bounded number of
    /// iterations (tests, one-shot invocations).
    pub async fn run(&self, iterations: Option<u64>) -> anyhow::Result<()> {
        self.monitor.mark_started();
        let mut completed: u64 = 0;
        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let processed = self.iteration().await?;
            self.monitor.count_batch();
            self.monitor
                .set_status(format!("Batch done, {processed} resources checked"));
            completed += 1;
            if let Some(limit) = iterations {
                if completed >= limit {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs_f64(self.settings.sleep_between_batches))
                .await;
        }
        Ok(())
    }

    /// One scheduler pass: select due resources and probe them with bounded
    /// concurrency. Returns how many resources were processed.
    pub async fn iteration(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let candidates = self
            .db
            .catalog()
            .due_candidates(self.settings.batch_size, &self.settings.excluded_patterns)?;
        let due: Vec<Resource> = candidates
            .into_iter()
            .filter(|c| is_due(c, self.settings.check_delay_days, now))
            .map(|c| c.resource)
            .collect();

        let count = due.len();
        stream::iter(due)
            .for_each_concurrent(self.settings.crawler_count.max(1), |resource| {
                let crawler = self.clone();
                async move {
                    if crawler.stop.load(Ordering::Relaxed) {
                        return;
                    }
                    if let Err(e) = crawler.check_resource(&resource, false).await {
                        tracing::error!(
                            resource_id = %resource.resource_id,
                            url = %resource.url,
                            error = %e,
                            "check failed"
                        );
                    }
                }
            })
            .await;
        Ok(count)
    }

    /// Probe one resource, journal the outcome, run change analysis, notify,
    /// and dispatch content analysis when warranted. Returns the check with
    /// every stamp applied so far.
    pub async fn check_resource(
        &self,
        resource: &Resource,
        force_analysis: bool,
    ) -> anyhow::Result<Check> {
        let catalog = self.db.catalog();
        let checks = self.db.checks();

        self.monitor
            .set_status(format!("Crawling url \"{}\"...", resource.url));
        catalog.set_status(&resource.resource_id, Some(ResourceStatus::CrawlingUrl))?;

        let probed = self.probe.probe(&resource.url).await;
        self.monitor.count_check();

        let check = checks.append(&NewCheck {
            resource_id: resource.resource_id,
            url: resource.url.clone(),
            status: probed.status,
            headers: probed.headers.clone(),
            timeout: probed.timeout,
            error: probed.error.clone(),
            response_time_ms: Some(probed.response_time_ms),
            ..Default::default()
        })?;
        let previous = checks.get_previous(&check)?;

        let analysis = analyze_change(
            &check,
            previous.as_ref(),
            resource.harvest_modified_at,
            Utc::now(),
        );
        if let Some(detection) = analysis.detection {
            checks.update_modified_detection(check.id, detection.at, detection.source)?;
        }

        if probed.needs_backoff() {
            catalog.set_status(&resource.resource_id, Some(ResourceStatus::Backoff))?;
        } else {
            catalog.set_status(&resource.resource_id, None)?;
            catalog.mark_checked(&resource.resource_id, Utc::now())?;
        }

        if analysis.should_notify() {
            let document = check_document(&check, &probed);
            self.notifier
                .notify(Some(&resource.dataset_id), &resource.resource_id, document)
                .await;
        }

        let probe_succeeded = matches!(check.status, Some(s) if (200..300).contains(&s));
        let analysis_due = force_analysis
            || analysis.is_first
            || !analysis.changed_signals.is_empty()
            || !analysis.proven_unchanged();
        if probe_succeeded && analysis_due {
            catalog.set_status(
                &resource.resource_id,
                Some(ResourceStatus::ToAnalyseResource),
            )?;
            let force = force_analysis || analysis.is_first;
            if let Err(e) = self.analyzer.analyse_resource(check.id, force).await {
                tracing::error!(
                    resource_id = %resource.resource_id,
                    error = %e,
                    "analysis failed"
                );
                catalog.set_status(&resource.resource_id, None)?;
            }
        }

        checks
            .get_by_id(check.id)?
            .ok_or_else(|| anyhow::anyhow!("check {} vanished", check.id))
    }
}

/// The `check:*` notification payload for one probe outcome.
fn check_document(check: &Check, probed: &ProbeResult) -> Document {
    let mut document = Document::new();
    document
        .set("check:date", check.created_at.to_rfc3339())
        .set(
            "check:status",
            check.status.map(Value::from).unwrap_or(Value::Null),
        )
        .set(
            "check:available",
            probed.available().map(Value::from).unwrap_or(Value::Null),
        )
        .set("check:timeout", check.timeout)
        .set(
            "check:error",
            check.error.clone().map(Value::from).unwrap_or(Value::Null),
        );
    if let Some(content_type) = check.headers.content_type() {
        document.set("check:headers:content-type", content_type);
    }
    if let Some(content_length) = check.headers.content_length() {
        document.set("check:headers:content-length", content_length);
    }
    document
}
