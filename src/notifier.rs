//! Outbound notifications to the catalog service.
//!
//! Every observed change is pushed as a flat, colon-namespaced JSON document
//! (`check:*`, `analysis:*`, `analysis:parsing:*`). Delivery is best-effort:
//! transient failures are retried a few times, then logged and dropped.
//! A broken webhook must never stall the crawler.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::Settings;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Builder for the flat payload.
#[derive(Debug, Clone, Default)]
pub struct Document(pub Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }
}

/// Something change events can be dispatched to. The production
/// implementation is the HTTP webhook; tests swap in a recorder.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, dataset_id: Option<&str>, resource_id: &Uuid, document: Document);
}

/// HTTP webhook notifier.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    enabled: bool,
}

impl Notifier {
    pub fn from_settings(settings: &Settings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(Duration::from_secs(settings.check_timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            webhook_url: settings.webhook_url.clone(),
            enabled: settings.webhook_enabled,
        })
    }

    async fn put_once(&self, url: &str, body: &Value) -> Result<(), String> {
        let response = self
            .client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;
        let status = response.status();
        if status.is_server_error() {
            return Err(format!("webhook returned {status}"));
        }
        if !status.is_success() {
            // 4xx is not transient; report and stop retrying
            tracing::error!(url, %status, "webhook rejected notification");
        }
        Ok(())
    }
}

#[async_trait]
impl Notify for Notifier {
    async fn notify(&self, dataset_id: Option<&str>, resource_id: &Uuid, document: Document) {
        if !self.enabled {
            return;
        }
        let Some(url) = self.webhook_url.as_deref() else {
            tracing::debug!("webhook URL not configured, dropping notification");
            return;
        };

        let mut body = document.0;
        body.insert("resource_id".to_string(), Value::from(resource_id.to_string()));
        if let Some(dataset_id) = dataset_id {
            body.insert("dataset_id".to_string(), Value::from(dataset_id));
        }
        let body = Value::Object(body);

        let mut delay = RETRY_BASE_DELAY;
        for attempt in 1..=RETRY_ATTEMPTS {
            match self.put_once(url, &body).await {
                Ok(()) => return,
                Err(e) if attempt < RETRY_ATTEMPTS => {
                    tracing::warn!(url, attempt, error = %e, "webhook delivery failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(url, error = %e, "webhook delivery failed, giving up");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records notifications instead of sending them.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<(Option<String>, Uuid, Map<String, Value>)>>,
    }

    #[async_trait]
    impl Notify for RecordingNotifier {
        async fn notify(&self, dataset_id: Option<&str>, resource_id: &Uuid, document: Document) {
            self.sent.lock().unwrap().push((
                dataset_id.map(String::from),
                *resource_id,
                document.0,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(url: Option<String>, enabled: bool) -> Notifier {
        let settings = Settings {
            webhook_url: url,
            webhook_enabled: enabled,
            ..Default::default()
        };
        Notifier::from_settings(&settings).unwrap()
    }

    #[tokio::test]
    async fn delivers_flat_document() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(body_partial_json(serde_json::json!({
                "check:status": 200,
                "check:available": true,
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier(Some(server.uri()), true);
        let mut document = Document::new();
        document.set("check:status", 200).set("check:available", true);
        notifier
            .notify(Some("dataset-1"), &Uuid::new_v4(), document)
            .await;
    }

    #[tokio::test]
    async fn disabled_notifier_stays_silent() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let notifier = notifier(Some(server.uri()), false);
        notifier
            .notify(None, &Uuid::new_v4(), Document::new())
            .await;
    }

    #[tokio::test]
    async fn retries_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier(Some(server.uri()), true);
        notifier
            .notify(None, &Uuid::new_v4(), Document::new())
            .await;
    }
}
