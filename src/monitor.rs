//! Process-wide crawl monitor.
//!
//! A small shared handle carrying counters and the last status line,
//! constructed at startup and passed down explicitly. The admin API surfaces
//! a snapshot of it on `/api/status/crawler`.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
struct MonitorInner {
    status: Option<String>,
    checks_performed: u64,
    batches_completed: u64,
    last_batch_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
}

/// Snapshot of the monitor state, serializable for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub status: Option<String>,
    pub checks_performed: u64,
    pub batches_completed: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Cheap-to-clone handle on shared crawl counters.
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    inner: Arc<Mutex<MonitorInner>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.started_at = Some(Utc::now());
    }

    pub fn set_status(&self, status: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = Some(status.into());
    }

    pub fn count_check(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.checks_performed += 1;
    }

    pub fn count_batch(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.batches_completed += 1;
        inner.last_batch_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        let inner = self.inner.lock().unwrap();
        MonitorSnapshot {
            status: inner.status.clone(),
            checks_performed: inner.checks_performed,
            batches_completed: inner.batches_completed,
            last_batch_at: inner.last_batch_at,
            started_at: inner.started_at,
        }
    }
}
