//! Alert notification
//!
//! The engine calls the configured [`Notifier`] once per newly created alert.
//! Delivery is best effort: failures are logged and never roll back the
//! stored alert.

mod webhook;

pub use webhook::{AlertmanagerAlert, AlertmanagerPayload, WebhookNotifier};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::alert::{Alert, Severity};
use crate::error::NotifyError;

/// Downstream sink for newly created alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Writes each alert to the structured log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        if alert.severity >= Severity::High {
            warn!(
                event = "alert_notification",
                alert_id = %alert.id,
                detector = %alert.detector_type,
                severity = %alert.severity,
                "{}",
                alert.description
            );
        } else {
            info!(
                event = "alert_notification",
                alert_id = %alert.id,
                detector = %alert.detector_type,
                severity = %alert.severity,
                "{}",
                alert.description
            );
        }
        Ok(())
    }
}

/// Delivers to every inner notifier, reporting the first failure
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn deliver(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.deliver(alert).await {
                warn!(notifier = notifier.name(), error = %e, "Notifier failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::alert::{AlertStore, Category, DetectorType, Finding};
    use chrono::Utc;

    fn alert() -> Alert {
        AlertStore::new().append(
            Finding::new(
                DetectorType::TrafficSpike,
                Category::Traffic,
                Severity::Medium,
                "spike",
                serde_json::Value::Null,
            ),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all_and_reports_failure() {
        let healthy = Arc::new(RecordingNotifier::default());
        let broken = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let other = Arc::new(RecordingNotifier::default());
        let fanout = FanoutNotifier::new(vec![healthy.clone(), broken, other.clone()]);

        let alert = alert();
        let result = fanout.deliver(&alert).await;

        assert!(matches!(result, Err(NotifyError::Rejected { status: 503, .. })));
        assert_eq!(healthy.delivered(), vec![alert.id.clone()]);
        assert_eq!(other.delivered(), vec![alert.id]);
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.deliver(&alert()).await.is_ok());
        assert_eq!(LogNotifier.name(), "log");
    }
}
