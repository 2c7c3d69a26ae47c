//! Observability for the anomaly engine
//!
//! Provides:
//! - Prometheus metrics (scan duration, scan outcomes, alert counts)
//! - Structured JSON logging of engine events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::alert::{Alert, AlertStatus, Severity};

/// Scan duration buckets (in seconds)
const SCAN_DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    scan_duration_seconds: Histogram,
    scans_completed: IntCounter,
    scans_skipped: IntCounter,
    scans_cancelled: IntCounter,
    detector_failures: IntCounterVec,
    alerts_created: IntCounterVec,
    active_alerts: IntGauge,
    notifications_failed: IntCounter,
    alerts_evicted: IntCounter,
    alerts_auto_resolved: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            scan_duration_seconds: register_histogram!(
                "anomaly_monitor_scan_duration_seconds",
                "Wall time of a complete detector scan",
                SCAN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register scan_duration_seconds"),

            scans_completed: register_int_counter!(
                "anomaly_monitor_scans_completed_total",
                "Scans that ran to completion"
            )
            .expect("Failed to register scans_completed"),

            scans_skipped: register_int_counter!(
                "anomaly_monitor_scans_skipped_total",
                "Scan triggers dropped because a scan was already running"
            )
            .expect("Failed to register scans_skipped"),

            scans_cancelled: register_int_counter!(
                "anomaly_monitor_scans_cancelled_total",
                "Scans cancelled before committing alerts"
            )
            .expect("Failed to register scans_cancelled"),

            detector_failures: register_int_counter_vec!(
                "anomaly_monitor_detector_failures_total",
                "Detector runs that failed or timed out",
                &["detector"]
            )
            .expect("Failed to register detector_failures"),

            alerts_created: register_int_counter_vec!(
                "anomaly_monitor_alerts_created_total",
                "Alerts created, by severity",
                &["severity"]
            )
            .expect("Failed to register alerts_created"),

            active_alerts: register_int_gauge!(
                "anomaly_monitor_active_alerts",
                "Alerts currently in the active state"
            )
            .expect("Failed to register active_alerts"),

            notifications_failed: register_int_counter!(
                "anomaly_monitor_notifications_failed_total",
                "Alert notifications that failed or timed out"
            )
            .expect("Failed to register notifications_failed"),

            alerts_evicted: register_int_counter!(
                "anomaly_monitor_alerts_evicted_total",
                "Alerts removed by the retention sweep"
            )
            .expect("Failed to register alerts_evicted"),

            alerts_auto_resolved: register_int_counter!(
                "anomaly_monitor_alerts_auto_resolved_total",
                "Low severity alerts resolved by timeout"
            )
            .expect("Failed to register alerts_auto_resolved"),
        }
    }
}

/// Handle to the process-wide engine metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_scan(&self, duration: Duration) {
        self.inner()
            .scan_duration_seconds
            .observe(duration.as_secs_f64());
        self.inner().scans_completed.inc();
    }

    pub fn inc_scans_skipped(&self) {
        self.inner().scans_skipped.inc();
    }

    pub fn inc_scans_cancelled(&self) {
        self.inner().scans_cancelled.inc();
    }

    pub fn inc_detector_failure(&self, detector: &str) {
        self.inner()
            .detector_failures
            .with_label_values(&[detector])
            .inc();
    }

    pub fn inc_alert_created(&self, severity: Severity) {
        self.inner()
            .alerts_created
            .with_label_values(&[&severity.to_string()])
            .inc();
    }

    pub fn set_active_alerts(&self, count: usize) {
        self.inner().active_alerts.set(count as i64);
    }

    pub fn active_alerts(&self) -> i64 {
        self.inner().active_alerts.get()
    }

    pub fn inc_notification_failed(&self) {
        self.inner().notifications_failed.inc();
    }

    pub fn add_alerts_evicted(&self, count: usize) {
        self.inner().alerts_evicted.inc_by(count as u64);
    }

    pub fn inc_auto_resolved(&self) {
        self.inner().alerts_auto_resolved.inc();
    }
}

/// Structured logger for engine events
///
/// Every record carries an `event` field and the engine instance name so
/// log pipelines can filter without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, scan_interval: Duration) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            version = %version,
            scan_interval_secs = scan_interval.as_secs(),
            "Anomaly engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Anomaly engine shutting down"
        );
    }

    pub fn log_alert_created(&self, alert: &Alert) {
        if alert.severity >= Severity::High {
            warn!(
                event = "alert_created",
                instance = %self.instance,
                alert_id = %alert.id,
                detector = %alert.detector_type,
                category = %alert.category,
                severity = %alert.severity,
                subject = ?alert.subject,
                "{}",
                alert.description
            );
        } else {
            info!(
                event = "alert_created",
                instance = %self.instance,
                alert_id = %alert.id,
                detector = %alert.detector_type,
                category = %alert.category,
                severity = %alert.severity,
                subject = ?alert.subject,
                "{}",
                alert.description
            );
        }
    }

    pub fn log_transition(&self, alert: &Alert, from: AlertStatus) {
        info!(
            event = "alert_transition",
            instance = %self.instance,
            alert_id = %alert.id,
            from = %from,
            to = %alert.status,
            acknowledged_by = ?alert.acknowledged_by,
            resolution = ?alert.resolution,
            "Alert status changed"
        );
    }

    pub fn log_scan_completed(&self, duration: Duration, alerts: usize, failures: usize) {
        if failures > 0 {
            warn!(
                event = "scan_completed",
                instance = %self.instance,
                duration_ms = duration.as_millis() as u64,
                alerts_created = alerts,
                detector_failures = failures,
                "Anomaly scan completed with detector failures"
            );
        } else {
            info!(
                event = "scan_completed",
                instance = %self.instance,
                duration_ms = duration.as_millis() as u64,
                alerts_created = alerts,
                "Anomaly scan completed"
            );
        }
    }

    pub fn log_scan_skipped(&self, trigger: &str) {
        info!(
            event = "scan_skipped",
            instance = %self.instance,
            trigger = %trigger,
            "Scan already in progress, skipping"
        );
    }

    pub fn log_detector_failed(&self, detector: &str, error: &str) {
        warn!(
            event = "detector_failed",
            instance = %self.instance,
            detector = %detector,
            error = %error,
            "Detector failed, no finding this cycle"
        );
    }

    pub fn log_notification_failed(&self, alert_id: &str, notifier: &str, error: &str) {
        warn!(
            event = "notification_failed",
            instance = %self.instance,
            alert_id = %alert_id,
            notifier = %notifier,
            error = %error,
            "Alert notification failed"
        );
    }

    pub fn log_thresholds_updated(&self, patch: &serde_json::Value) {
        info!(
            event = "thresholds_updated",
            instance = %self.instance,
            patch = %patch,
            "Detection thresholds updated"
        );
    }

    pub fn log_alerts_evicted(&self, count: usize, retention: Duration) {
        info!(
            event = "alerts_evicted",
            instance = %self.instance,
            count = count,
            retention_secs = retention.as_secs(),
            "Evicted expired alerts"
        );
    }
}
