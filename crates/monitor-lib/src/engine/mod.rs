//! Anomaly engine
//!
//! Ties the detector set, alert store, threshold registry and notifier
//! together. A scan runs every detector concurrently against one threshold
//! snapshot, then commits the whole batch of findings at once. Scans never
//! overlap: a trigger that arrives while one is in flight is reported as
//! already running.

mod auto_resolve;
mod scheduler;

pub use auto_resolve::AUTO_RESOLUTION;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn};

use crate::alert::{
    Alert, AlertFilter, AlertStats, AlertStatus, AlertStore, DetectorType, Finding, Severity,
    TrendPeriod, TrendPoint,
};
use crate::detector::{self, Baselines, ScanContext};
use crate::error::{AlertError, MetricsError, NotifyError, ThresholdError};
use crate::health::{components, HealthRegistry};
use crate::notify::Notifier;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::source::MetricsSource;
use crate::thresholds::{ThresholdCategory, ThresholdRegistry, Thresholds};
use auto_resolve::AutoResolver;

/// Default scan interval
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Default baseline refresh interval
pub const DEFAULT_BASELINE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default retention sweep interval
pub const DEFAULT_RETENTION_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Timing and retention settings for the engine
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub scan_interval: Duration,
    pub baseline_interval: Duration,
    pub retention_interval: Duration,
    /// Alerts detected longer ago than this are evicted
    pub alert_retention: Duration,
    /// Raw activity events older than this are expired from the source
    pub event_retention: Duration,
    /// Delay before a low severity alert is auto-resolved
    pub auto_resolve_after: Duration,
    pub notify_timeout: Duration,
    pub detector_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            baseline_interval: DEFAULT_BASELINE_INTERVAL,
            retention_interval: DEFAULT_RETENTION_INTERVAL,
            alert_retention: Duration::from_secs(7 * 24 * 60 * 60),
            event_retention: Duration::from_secs(90 * 24 * 60 * 60),
            auto_resolve_after: Duration::from_secs(60 * 60),
            notify_timeout: Duration::from_secs(5),
            detector_timeout: Duration::from_secs(10),
        }
    }
}

/// A detector that failed, timed out or panicked during a scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorFailure {
    pub detector: DetectorType,
    pub error: String,
}

/// Result of a completed scan
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Alerts committed by this scan, in detector order
    pub alerts: Vec<Alert>,
    pub failures: Vec<DetectorFailure>,
}

#[derive(Debug)]
pub enum ScanOutcome {
    Completed(ScanReport),
    AlreadyRunning,
    /// Cancelled before commit; nothing was stored
    Cancelled,
}

/// Result of an out-of-band scan request
#[derive(Debug)]
pub enum TriggerOutcome {
    Accepted(JoinHandle<ScanOutcome>),
    AlreadyRunning,
}

impl TriggerOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TriggerOutcome::Accepted(_))
    }
}

/// Snapshot of engine state for status endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub alerts: AlertStats,
    pub last_scan: Option<DateTime<Utc>>,
    pub scanning: bool,
    pub baselines: Baselines,
    pub pending_auto_resolves: usize,
}

/// Holds the scanning flag for the lifetime of one scan
struct ScanGuard(Arc<AtomicBool>);

impl ScanGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScanGuard(Arc::clone(flag)))
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Aborts detector tasks when a scan is abandoned
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// The scheduled anomaly-scan engine
pub struct AnomalyEngine {
    config: EngineConfig,
    source: Arc<dyn MetricsSource>,
    notifier: Arc<dyn Notifier>,
    store: Arc<AlertStore>,
    thresholds: ThresholdRegistry,
    baselines: RwLock<Baselines>,
    auto_resolver: AutoResolver,
    scanning: Arc<AtomicBool>,
    last_scan: RwLock<Option<DateTime<Utc>>>,
    cancel_tx: broadcast::Sender<()>,
    shutdown_tx: broadcast::Sender<()>,
    metrics: EngineMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl AnomalyEngine {
    pub fn builder() -> AnomalyEngineBuilder {
        AnomalyEngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    // ---- scanning ----

    fn begin_scan(&self, trigger: &str) -> Option<ScanGuard> {
        let guard = ScanGuard::acquire(&self.scanning);
        if guard.is_none() {
            self.metrics.inc_scans_skipped();
            self.logger.log_scan_skipped(trigger);
        }
        guard
    }

    /// Run one scan on the current task
    pub async fn run_scan(&self) -> ScanOutcome {
        self.run_scan_for("manual").await
    }

    pub(crate) async fn run_scan_for(&self, trigger: &str) -> ScanOutcome {
        let Some(guard) = self.begin_scan(trigger) else {
            return ScanOutcome::AlreadyRunning;
        };
        let cancel = self.cancel_tx.subscribe();
        self.scan(guard, cancel).await
    }

    /// Start an out-of-band scan in the background
    ///
    /// The scanning flag is taken before this returns, so a second trigger
    /// is rejected even if the first scan has not been polled yet.
    pub fn trigger_scan(self: &Arc<Self>) -> TriggerOutcome {
        let Some(guard) = self.begin_scan("manual") else {
            return TriggerOutcome::AlreadyRunning;
        };
        let cancel = self.cancel_tx.subscribe();
        let engine = Arc::clone(self);
        TriggerOutcome::Accepted(tokio::spawn(async move { engine.scan(guard, cancel).await }))
    }

    /// Ask an in-flight scan to stop before it commits
    pub fn cancel_scan(&self) -> bool {
        if !self.is_scanning() {
            return false;
        }
        let _ = self.cancel_tx.send(());
        true
    }

    async fn scan(&self, _guard: ScanGuard, mut cancel: broadcast::Receiver<()>) -> ScanOutcome {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let thresholds = self.thresholds.snapshot();

        let (findings, failures) = tokio::select! {
            result = self.detect(thresholds, started_at) => result,
            _ = cancel.recv() => {
                self.metrics.inc_scans_cancelled();
                info!(instance = %self.logger.instance(), "Scan cancelled before commit");
                return ScanOutcome::Cancelled;
            }
        };

        for failure in &failures {
            self.metrics.inc_detector_failure(failure.detector.as_str());
            self.logger
                .log_detector_failed(failure.detector.as_str(), &failure.error);
        }

        let alerts = self.store.append_batch(findings, Utc::now());
        self.publish(&alerts).await;

        let duration = clock.elapsed();
        *self.last_scan.write().unwrap_or_else(PoisonError::into_inner) = Some(started_at);
        self.metrics.observe_scan(duration);
        self.logger
            .log_scan_completed(duration, alerts.len(), failures.len());

        if failures.is_empty() {
            self.health.set_healthy(components::METRICS_SOURCE).await;
        } else {
            self.health
                .set_degraded(
                    components::METRICS_SOURCE,
                    format!("{} detectors failed in the last scan", failures.len()),
                )
                .await;
        }

        ScanOutcome::Completed(ScanReport {
            started_at,
            duration,
            alerts,
            failures,
        })
    }

    /// Run every detector in its own task and collect the results
    async fn detect(
        &self,
        thresholds: Arc<Thresholds>,
        now: DateTime<Utc>,
    ) -> (Vec<Finding>, Vec<DetectorFailure>) {
        let ctx = ScanContext {
            source: Arc::clone(&self.source),
            thresholds,
            baselines: self.current_baselines(now).await,
            now,
        };
        let timeout = self.config.detector_timeout;

        let tasks: Vec<_> = DetectorType::ALL
            .iter()
            .map(|&kind| {
                let ctx = ctx.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::timeout(timeout, detector::run(kind, &ctx)).await
                });
                (kind, handle)
            })
            .collect();
        let _abort = AbortOnDrop(tasks.iter().map(|(_, h)| h.abort_handle()).collect());

        let mut findings = Vec::new();
        let mut failures = Vec::new();
        for (kind, handle) in tasks {
            let error = match handle.await {
                Ok(Ok(Ok(found))) => {
                    findings.extend(found);
                    continue;
                }
                Ok(Ok(Err(e))) => e.to_string(),
                Ok(Err(_)) => MetricsError::Timeout(timeout).to_string(),
                Err(e) if e.is_panic() => "detector panicked".to_string(),
                Err(e) => e.to_string(),
            };
            failures.push(DetectorFailure {
                detector: kind,
                error,
            });
        }
        (findings, failures)
    }

    async fn current_baselines(&self, now: DateTime<Utc>) -> Baselines {
        let cached = *self.baselines.read().unwrap_or_else(PoisonError::into_inner);
        if cached.is_computed() {
            return cached;
        }
        match self.compute_baselines(now).await {
            Ok(baselines) => baselines,
            Err(e) => {
                warn!(error = %e, "Baseline computation failed, traffic detectors disabled");
                Baselines::default()
            }
        }
    }

    async fn compute_baselines(&self, now: DateTime<Utc>) -> Result<Baselines, MetricsError> {
        let baselines = Baselines::compute(self.source.as_ref(), now).await?;
        *self.baselines.write().unwrap_or_else(PoisonError::into_inner) = baselines;
        Ok(baselines)
    }

    /// Recompute traffic baselines now
    pub async fn refresh_baselines(&self) -> Result<Baselines, MetricsError> {
        self.compute_baselines(Utc::now()).await
    }

    pub fn baselines(&self) -> Baselines {
        *self.baselines.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- alert publication ----

    /// Store a finding from outside the detector set and publish it
    pub async fn record_finding(&self, finding: Finding) -> Alert {
        let alert = self.store.append(finding, Utc::now());
        self.publish(std::slice::from_ref(&alert)).await;
        alert
    }

    async fn publish(&self, alerts: &[Alert]) {
        if alerts.is_empty() {
            return;
        }
        for alert in alerts {
            self.metrics.inc_alert_created(alert.severity);
            self.logger.log_alert_created(alert);
            if alert.severity == Severity::Low {
                self.auto_resolver
                    .schedule(Arc::clone(&self.store), alert.id.clone());
            }
        }
        self.refresh_active_gauge();

        for alert in alerts {
            self.notify(alert).await;
        }
    }

    async fn notify(&self, alert: &Alert) {
        let timeout = self.config.notify_timeout;
        let error = match tokio::time::timeout(timeout, self.notifier.deliver(alert)).await {
            Ok(Ok(())) => {
                self.health.set_healthy(components::NOTIFIER).await;
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => NotifyError::Timeout(timeout),
        };

        self.metrics.inc_notification_failed();
        self.logger
            .log_notification_failed(&alert.id, self.notifier.name(), &error.to_string());
        self.health
            .set_degraded(components::NOTIFIER, error.to_string())
            .await;
    }

    fn refresh_active_gauge(&self) {
        self.metrics.set_active_alerts(self.store.stats().active);
    }

    // ---- lifecycle ----

    pub fn acknowledge(&self, id: &str, actor: &str) -> Result<Alert, AlertError> {
        let before = self.store.get(id).map(|a| a.status);
        let alert = self.store.acknowledge(id, actor, Utc::now())?;
        if let Some(from) = before.filter(|from| *from != alert.status) {
            self.logger.log_transition(&alert, from);
            self.refresh_active_gauge();
        }
        Ok(alert)
    }

    /// Resolve an alert; also drops its pending auto-resolve timer
    pub fn resolve(&self, id: &str, resolution: &str) -> Result<Alert, AlertError> {
        let before = self.store.get(id).map(|a| a.status);
        let alert = self.store.resolve(id, resolution, Utc::now())?;
        self.auto_resolver.cancel(id);
        self.logger
            .log_transition(&alert, before.unwrap_or(AlertStatus::Active));
        self.refresh_active_gauge();
        Ok(alert)
    }

    pub fn get_alert(&self, id: &str) -> Option<Alert> {
        self.store.get(id)
    }

    pub fn list_active_alerts(&self) -> Vec<Alert> {
        self.store.list_active()
    }

    pub fn list_alerts(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.store.list(filter)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            alerts: self.store.stats(),
            last_scan: *self.last_scan.read().unwrap_or_else(PoisonError::into_inner),
            scanning: self.is_scanning(),
            baselines: self.baselines(),
            pending_auto_resolves: self.auto_resolver.pending_count(),
        }
    }

    pub fn trends(&self, period: TrendPeriod) -> Vec<TrendPoint> {
        self.store.trends(period, Utc::now())
    }

    /// Evict alerts past the retention period; returns how many were removed
    pub fn evict_expired(&self) -> usize {
        let evicted = self
            .store
            .evict_older_than(to_chrono(self.config.alert_retention), Utc::now());
        for id in &evicted {
            self.auto_resolver.cancel(id);
        }
        if !evicted.is_empty() {
            self.metrics.add_alerts_evicted(evicted.len());
            self.logger
                .log_alerts_evicted(evicted.len(), self.config.alert_retention);
            self.refresh_active_gauge();
        }
        evicted.len()
    }

    /// Expire raw events from the metrics source
    pub async fn expire_events(&self) -> Result<usize, MetricsError> {
        let cutoff = Utc::now() - to_chrono(self.config.event_retention);
        self.source.expire_events_before(cutoff).await
    }

    // ---- thresholds ----

    pub fn thresholds(&self) -> Arc<Thresholds> {
        self.thresholds.snapshot()
    }

    pub fn threshold_category(&self, category: ThresholdCategory) -> Value {
        self.thresholds.get(category)
    }

    /// Deep-merge a partial update; takes effect from the next scan
    pub fn update_thresholds(&self, patch: &Value) -> Result<Arc<Thresholds>, ThresholdError> {
        let updated = self.thresholds.update(patch)?;
        self.logger.log_thresholds_updated(patch);
        Ok(updated)
    }
}

/// Builder for [`AnomalyEngine`]
pub struct AnomalyEngineBuilder {
    source: Option<Arc<dyn MetricsSource>>,
    notifier: Option<Arc<dyn Notifier>>,
    thresholds: Thresholds,
    config: EngineConfig,
    instance: String,
    health: Option<HealthRegistry>,
}

impl AnomalyEngineBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            notifier: None,
            thresholds: Thresholds::default(),
            config: EngineConfig::default(),
            instance: "anomaly-monitor".to_string(),
            health: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Initial thresholds
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Instance name carried by every log record
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    /// Share an existing health registry
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> anyhow::Result<Arc<AnomalyEngine>> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;
        let notifier = self
            .notifier
            .ok_or_else(|| anyhow::anyhow!("Notifier is required"))?;

        let config = self.config;
        for (name, value) in [
            ("scan interval", config.scan_interval),
            ("baseline interval", config.baseline_interval),
            ("retention interval", config.retention_interval),
            ("detector timeout", config.detector_timeout),
            ("notify timeout", config.notify_timeout),
        ] {
            anyhow::ensure!(!value.is_zero(), "{} must be greater than zero", name);
        }

        let metrics = EngineMetrics::new();
        let logger = StructuredLogger::new(self.instance);
        let (cancel_tx, _) = broadcast::channel(4);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Arc::new(AnomalyEngine {
            auto_resolver: AutoResolver::new(
                config.auto_resolve_after,
                metrics.clone(),
                logger.clone(),
            ),
            config,
            source,
            notifier,
            store: Arc::new(AlertStore::new()),
            thresholds: ThresholdRegistry::new(self.thresholds),
            baselines: RwLock::new(Baselines::default()),
            scanning: Arc::new(AtomicBool::new(false)),
            last_scan: RwLock::new(None),
            cancel_tx,
            shutdown_tx,
            metrics,
            logger,
            health: self.health.unwrap_or_default(),
        }))
    }
}

impl Default for AnomalyEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::Category;
    use crate::detector::testing::StubSource;
    use crate::health::ComponentStatus;
    use crate::models::EventKind;
    use crate::notify::testing::RecordingNotifier;
    use serde_json::json;

    fn engine(source: StubSource, notifier: Arc<RecordingNotifier>) -> Arc<AnomalyEngine> {
        AnomalyEngineBuilder::new()
            .source(Arc::new(source))
            .notifier(notifier)
            .instance("test")
            .build()
            .unwrap()
    }

    fn completed(outcome: ScanOutcome) -> ScanReport {
        match outcome {
            ScanOutcome::Completed(report) => report,
            other => panic!("expected completed scan, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_requires_source_and_notifier() {
        assert!(AnomalyEngineBuilder::new().build().is_err());
        assert!(AnomalyEngineBuilder::new()
            .source(Arc::new(StubSource::default()))
            .build()
            .is_err());
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let result = AnomalyEngineBuilder::new()
            .source(Arc::new(StubSource::default()))
            .notifier(Arc::new(RecordingNotifier::default()))
            .config(EngineConfig {
                scan_interval: Duration::ZERO,
                ..Default::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rapid_login_scan_creates_one_alert() {
        let notifier = Arc::new(RecordingNotifier::default());
        let source = StubSource::default().group(Some(EventKind::Login), "user-42", 12);
        let engine = engine(source, Arc::clone(&notifier));
        engine
            .update_thresholds(&json!({"loginFrequency": {"maxLoginsPerMinute": 10}}))
            .unwrap();

        let report = completed(engine.run_scan().await);

        assert!(report.failures.is_empty());
        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        assert_eq!(alert.detector_type, DetectorType::RapidLoginAttempts);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.subject.as_deref(), Some("user-42"));
        assert!(alert.id.starts_with("rapid_login_attempts_"));

        assert_eq!(engine.list_active_alerts().len(), 1);
        assert_eq!(notifier.delivered(), vec![alert.id.clone()]);
        assert!(engine.stats().last_scan.is_some());
    }

    #[tokio::test]
    async fn test_memory_scenarios() {
        let engine_hot = engine(
            StubSource::default().heap(0.90),
            Arc::new(RecordingNotifier::default()),
        );
        let report = completed(engine_hot.run_scan().await);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].detector_type, DetectorType::HighMemoryUsage);
        assert_eq!(report.alerts[0].severity, Severity::Medium);

        let engine_cool = engine(
            StubSource::default().heap(0.50),
            Arc::new(RecordingNotifier::default()),
        );
        let report = completed(engine_cool.run_scan().await);
        assert!(report.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_failing_detector_is_isolated() {
        let source = StubSource {
            fail_latency: true,
            ..Default::default()
        }
        .heap(0.90);
        let engine = engine(source, Arc::new(RecordingNotifier::default()));

        let report = completed(engine.run_scan().await);

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].detector,
            DetectorType::SlowDatabaseResponse
        );
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].detector_type, DetectorType::HighMemoryUsage);
        assert_eq!(
            engine.health().status_of(components::METRICS_SOURCE).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_no_history_produces_no_traffic_alerts() {
        let engine = engine(StubSource::default(), Arc::new(RecordingNotifier::default()));

        let report = completed(engine.run_scan().await);

        assert!(report.alerts.is_empty());
        assert!(engine.baselines().is_computed());
        assert_eq!(engine.baselines().daily_average, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_during_scan_is_rejected() {
        let source = StubSource {
            delay: Duration::from_secs(2),
            ..Default::default()
        }
        .heap(0.90);
        let engine = engine(source, Arc::new(RecordingNotifier::default()));

        let first = engine.trigger_scan();
        assert!(first.is_accepted());
        assert!(engine.is_scanning());
        assert!(!engine.trigger_scan().is_accepted());
        assert!(matches!(engine.run_scan().await, ScanOutcome::AlreadyRunning));

        let TriggerOutcome::Accepted(handle) = first else {
            unreachable!()
        };
        let report = completed(handle.await.unwrap());

        assert_eq!(report.alerts.len(), 1);
        assert_eq!(engine.store().len(), 1);
        assert!(!engine.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_scan_commits_nothing() {
        let source = StubSource {
            delay: Duration::from_secs(5),
            ..Default::default()
        }
        .heap(0.90);
        let engine = engine(source, Arc::new(RecordingNotifier::default()));

        let TriggerOutcome::Accepted(handle) = engine.trigger_scan() else {
            panic!("scan should be accepted");
        };
        assert!(engine.cancel_scan());

        assert!(matches!(handle.await.unwrap(), ScanOutcome::Cancelled));
        assert!(engine.store().is_empty());
        assert!(!engine.cancel_scan());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_timeout_is_a_failure() {
        let source = StubSource {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let engine = AnomalyEngineBuilder::new()
            .source(Arc::new(source))
            .notifier(Arc::new(RecordingNotifier::default()))
            .config(EngineConfig {
                detector_timeout: Duration::from_secs(1),
                ..Default::default()
            })
            .build()
            .unwrap();
        // Skip the slow inline baseline computation
        *engine.baselines.write().unwrap() = Baselines {
            computed_at: Some(Utc::now()),
            ..Default::default()
        };

        let report = completed(engine.run_scan().await);

        // Every detector that counts events times out
        assert!(report
            .failures
            .iter()
            .any(|f| f.detector == DetectorType::RapidLoginAttempts));
        assert!(report
            .failures
            .iter()
            .all(|f| f.error.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_alert_auto_resolves_after_an_hour() {
        let engine = engine(StubSource::default(), Arc::new(RecordingNotifier::default()));
        let low = |description: &str| {
            Finding::new(
                DetectorType::TrafficSpike,
                Category::Traffic,
                Severity::Low,
                description,
                Value::Null,
            )
        };

        let untouched = engine.record_finding(low("left alone")).await;
        let manual = engine.record_finding(low("handled by hand")).await;
        assert_eq!(engine.stats().pending_auto_resolves, 2);

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        engine.resolve(&manual.id, "fixed upstream").unwrap();

        tokio::time::sleep(Duration::from_secs(51 * 60)).await;

        let untouched = engine.get_alert(&untouched.id).unwrap();
        assert_eq!(untouched.status, AlertStatus::Resolved);
        assert_eq!(untouched.resolution.as_deref(), Some(AUTO_RESOLUTION));

        let manual = engine.get_alert(&manual.id).unwrap();
        assert_eq!(manual.resolution.as_deref(), Some("fixed upstream"));
        assert_eq!(engine.stats().pending_auto_resolves, 0);
    }

    #[tokio::test]
    async fn test_high_alert_is_not_auto_resolved() {
        let engine = engine(StubSource::default(), Arc::new(RecordingNotifier::default()));
        engine
            .record_finding(Finding::new(
                DetectorType::BruteForceAttempt,
                Category::Security,
                Severity::Critical,
                "bf",
                Value::Null,
            ))
            .await;
        assert_eq!(engine.stats().pending_auto_resolves, 0);
    }

    #[tokio::test]
    async fn test_acknowledge_and_resolve_lifecycle() {
        let engine = engine(
            StubSource::default().heap(0.9),
            Arc::new(RecordingNotifier::default()),
        );
        let report = completed(engine.run_scan().await);
        let id = report.alerts[0].id.clone();

        assert_eq!(engine.acknowledge(&id, " "), Err(AlertError::InvalidActor));
        let acked = engine.acknowledge(&id, "alice").unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert!(engine.list_active_alerts().is_empty());

        let resolved = engine.resolve(&id, "scaled up").unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);

        assert_eq!(
            engine.resolve(&id, "again"),
            Err(AlertError::AlreadyResolved(id.clone()))
        );
        assert_eq!(
            engine.get_alert(&id).unwrap().resolution.as_deref(),
            Some("scaled up")
        );
        assert_eq!(
            engine.acknowledge("missing", "alice"),
            Err(AlertError::NotFound("missing".into()))
        );
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_lose_alert() {
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let engine = engine(StubSource::default().heap(0.95), notifier);

        let report = completed(engine.run_scan().await);

        assert_eq!(report.alerts.len(), 1);
        assert_eq!(engine.list_active_alerts().len(), 1);
        assert_eq!(
            engine.health().status_of(components::NOTIFIER).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_notifier_times_out() {
        let notifier = Arc::new(RecordingNotifier {
            delay: Duration::from_secs(60),
            ..Default::default()
        });
        let engine = engine(StubSource::default().heap(0.95), Arc::clone(&notifier));

        let report = completed(engine.run_scan().await);

        assert_eq!(report.alerts.len(), 1);
        assert!(notifier.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_threshold_patch_changes_only_named_key() {
        let engine = engine(StubSource::default(), Arc::new(RecordingNotifier::default()));
        let before = engine.thresholds();

        engine
            .update_thresholds(&json!({"security": {"maxFailedLoginsPerUser": 3}}))
            .unwrap();
        let after = engine.thresholds();

        assert_eq!(after.security.max_failed_logins_per_user, 3);
        assert_eq!(
            after.security.suspicious_user_agent_patterns,
            before.security.suspicious_user_agent_patterns
        );
        assert_eq!(
            after.security.max_failed_logins_global,
            before.security.max_failed_logins_global
        );
        assert_eq!(after.traffic, before.traffic);
        assert_eq!(after.login_frequency, before.login_frequency);
        assert_eq!(after.performance, before.performance);
        // The earlier snapshot is untouched
        assert_eq!(before.security.max_failed_logins_per_user, 5);
    }

    #[tokio::test]
    async fn test_invalid_threshold_patch_leaves_state() {
        let engine = engine(StubSource::default(), Arc::new(RecordingNotifier::default()));
        let result = engine.update_thresholds(&json!({"security": {"maxFailedLoginsPerUser": "x"}}));

        assert!(result.is_err());
        assert_eq!(engine.thresholds().security.max_failed_logins_per_user, 5);
    }

    #[tokio::test]
    async fn test_evict_expired_keeps_recent() {
        let engine = engine(StubSource::default().heap(0.9), Arc::new(RecordingNotifier::default()));
        completed(engine.run_scan().await);

        assert_eq!(engine.evict_expired(), 0);
        assert_eq!(engine.store().len(), 1);
    }
}
