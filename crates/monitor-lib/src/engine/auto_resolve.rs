//! Deferred auto-resolution of low severity alerts

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::alert::{AlertStatus, AlertStore};
use crate::observability::{EngineMetrics, StructuredLogger};

/// Resolution text written by the timer
pub const AUTO_RESOLUTION: &str = "auto-resolved";

struct PendingTimer {
    /// Distinguishes a rescheduled timer from the one it replaced
    token: u64,
    handle: JoinHandle<()>,
}

/// One-shot timers keyed by alert id
pub(crate) struct AutoResolver {
    delay: Duration,
    pending: Arc<DashMap<String, PendingTimer>>,
    next_token: AtomicU64,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl AutoResolver {
    pub(crate) fn new(delay: Duration, metrics: EngineMetrics, logger: StructuredLogger) -> Self {
        Self {
            delay,
            pending: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(0),
            metrics,
            logger,
        }
    }

    /// Resolve `alert_id` after the delay unless it has left the active state
    pub(crate) fn schedule(&self, store: Arc<AlertStore>, alert_id: String) {
        let delay = self.delay;
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let metrics = self.metrics.clone();
        let logger = self.logger.clone();
        let id = alert_id.clone();
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // The entry must exist before the timer can remove it
            let _ = registered_rx.await;
            tokio::time::sleep(delay).await;
            pending.remove_if(&id, |_, timer| timer.token == token);

            // Check and resolve happen under the store's write lock
            match store.resolve_if_active(&id, AUTO_RESOLUTION, Utc::now()) {
                Some(alert) => {
                    metrics.inc_auto_resolved();
                    metrics.set_active_alerts(store.stats().active);
                    logger.log_transition(&alert, AlertStatus::Active);
                }
                None => debug!(alert_id = %id, "Alert no longer active, skipping auto-resolve"),
            }
        });

        if let Some(previous) = self.pending.insert(alert_id, PendingTimer { token, handle }) {
            previous.handle.abort();
        }
        let _ = registered_tx.send(());
    }

    /// Drop the timer for an alert that was resolved or evicted
    pub(crate) fn cancel(&self, alert_id: &str) -> bool {
        match self.pending.remove(alert_id) {
            Some((_, timer)) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&self) {
        self.pending.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|e| !e.value().handle.is_finished())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Category, DetectorType, Finding, Severity};

    fn low_alert(store: &AlertStore) -> String {
        store
            .append(
                Finding::new(
                    DetectorType::TrafficSpike,
                    Category::Traffic,
                    Severity::Low,
                    "minor spike",
                    serde_json::Value::Null,
                ),
                Utc::now(),
            )
            .id
    }

    fn resolver(delay: Duration) -> AutoResolver {
        AutoResolver::new(delay, EngineMetrics::new(), StructuredLogger::new("test"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_after_delay() {
        let store = Arc::new(AlertStore::new());
        let id = low_alert(&store);
        let resolver = resolver(Duration::from_secs(3600));

        resolver.schedule(Arc::clone(&store), id.clone());
        assert_eq!(resolver.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(59 * 60)).await;
        assert_eq!(store.get(&id).unwrap().status, AlertStatus::Active);

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        let alert = store.get(&id).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.resolution.as_deref(), Some(AUTO_RESOLUTION));
        assert_eq!(resolver.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let store = Arc::new(AlertStore::new());
        let id = low_alert(&store);
        let resolver = resolver(Duration::from_secs(60));

        resolver.schedule(Arc::clone(&store), id.clone());
        assert!(resolver.cancel(&id));
        assert!(!resolver.cancel(&id));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.get(&id).unwrap().status, AlertStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_alert_is_left_alone() {
        let store = Arc::new(AlertStore::new());
        let id = low_alert(&store);
        let resolver = resolver(Duration::from_secs(60));

        resolver.schedule(Arc::clone(&store), id.clone());
        store.acknowledge(&id, "oncall", Utc::now()).unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(store.get(&id).unwrap().status, AlertStatus::Acknowledged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_timer_leaves_no_entry_behind() {
        let store = Arc::new(AlertStore::new());
        let id = low_alert(&store);
        let resolver = resolver(Duration::ZERO);

        resolver.schedule(Arc::clone(&store), id.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(store.get(&id).unwrap().status, AlertStatus::Resolved);
        assert!(resolver.pending.is_empty());
        assert!(!resolver.cancel(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduled_timer_keeps_its_entry() {
        let store = Arc::new(AlertStore::new());
        let id = low_alert(&store);
        let resolver = resolver(Duration::from_secs(60));

        resolver.schedule(Arc::clone(&store), id.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        resolver.schedule(Arc::clone(&store), id.clone());

        // The first timer would have fired here
        tokio::time::sleep(Duration::from_secs(45)).await;
        assert_eq!(store.get(&id).unwrap().status, AlertStatus::Active);
        assert_eq!(resolver.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.get(&id).unwrap().status, AlertStatus::Resolved);
        assert!(resolver.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_resolve_refreshes_active_gauge() {
        let store = Arc::new(AlertStore::new());
        for n in 0..4 {
            store.append(
                Finding::new(
                    DetectorType::BruteForceAttempt,
                    Category::Security,
                    Severity::High,
                    format!("burst {}", n),
                    serde_json::Value::Null,
                ),
                Utc::now(),
            );
        }
        let id = low_alert(&store);
        let resolver = resolver(Duration::from_secs(60));
        resolver.metrics.set_active_alerts(store.stats().active);

        resolver.schedule(Arc::clone(&store), id);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(store.stats().active, 4);
        assert_eq!(resolver.metrics.active_alerts(), 4);
    }
}
