//! Alertmanager-compatible webhook delivery
//!
//! Handles:
//! - Formatting alerts for an Alertmanager webhook receiver
//! - Deduplication of repeat alerts within a configurable window
//! - Mapping non-2xx responses to [`NotifyError::Rejected`]

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Notifier;
use crate::alert::{Alert, DetectorType};
use crate::error::NotifyError;

/// Default deduplication window (15 minutes)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 15 * 60;

/// Alertmanager webhook alert format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerAlert {
    /// firing or resolved
    pub status: String,
    /// Labels for routing and grouping
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// RFC3339
    pub starts_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

impl AlertmanagerAlert {
    pub fn from_alert(alert: &Alert, instance: &str) -> Self {
        let mut labels = HashMap::new();
        labels.insert("alertname".to_string(), alert_name(alert.detector_type));
        labels.insert("severity".to_string(), alert.severity.to_string());
        labels.insert("category".to_string(), alert.category.to_string());
        labels.insert("detector".to_string(), alert.detector_type.to_string());
        labels.insert("instance".to_string(), instance.to_string());
        if let Some(subject) = &alert.subject {
            labels.insert("subject".to_string(), subject.clone());
        }

        let mut annotations = HashMap::new();
        annotations.insert("summary".to_string(), alert.description.clone());
        annotations.insert("alert_id".to_string(), alert.id.clone());
        annotations.insert("evidence".to_string(), alert.evidence.to_string());

        Self {
            status: "firing".to_string(),
            labels,
            annotations,
            starts_at: alert.detected_at.to_rfc3339(),
            ends_at: None,
            generator_url: None,
        }
    }
}

/// Alertmanager webhook payload (array of alerts)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertmanagerPayload {
    pub alerts: Vec<AlertmanagerAlert>,
}

/// `traffic_drop` -> `TrafficDrop`
fn alert_name(detector: DetectorType) -> String {
    detector
        .as_str()
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Key for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    detector: DetectorType,
    subject: Option<String>,
}

impl DedupKey {
    fn of(alert: &Alert) -> Self {
        Self {
            detector: alert.detector_type,
            subject: alert.subject.clone(),
        }
    }
}

/// Posts alerts to an Alertmanager-style webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    instance: String,
    dedup_window: Duration,
    /// key -> last delivery time
    recent: RwLock<HashMap<DedupKey, Instant>>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            instance: "anomaly-monitor".to_string(),
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            recent: RwLock::new(HashMap::new()),
        })
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Value of the `instance` label
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Whether an equivalent alert was delivered within the window
    pub fn should_suppress(&self, alert: &Alert) -> bool {
        let recent = self.recent.read().unwrap_or_else(PoisonError::into_inner);
        recent
            .get(&DedupKey::of(alert))
            .is_some_and(|last| last.elapsed() < self.dedup_window)
    }

    fn record(&self, alert: &Alert) {
        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        recent.insert(DedupKey::of(alert), Instant::now());
        recent.retain(|_, time| time.elapsed() < self.dedup_window);
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        if self.should_suppress(alert) {
            debug!(alert_id = %alert.id, "Suppressed duplicate webhook alert");
            return Ok(());
        }

        let payload = AlertmanagerPayload {
            alerts: vec![AlertmanagerAlert::from_alert(alert, &self.instance)],
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        self.record(alert);
        Ok(())
    }
}
