//! Periodic engine loops
//!
//! Three independent timers drive the engine: the anomaly scan, the traffic
//! baseline refresh and the retention sweep. Each loop stops on the shared
//! shutdown broadcast.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{AnomalyEngine, ScanOutcome};
use crate::health::components;

impl AnomalyEngine {
    /// Spawn the scan, baseline and retention loops
    pub async fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        self.health.register(components::SCANNER).await;
        self.health.register(components::METRICS_SOURCE).await;
        self.health.register(components::NOTIFIER).await;

        let handles = vec![
            tokio::spawn(Arc::clone(self).scan_loop(self.shutdown_tx.subscribe())),
            tokio::spawn(Arc::clone(self).baseline_loop(self.shutdown_tx.subscribe())),
            tokio::spawn(Arc::clone(self).retention_loop(self.shutdown_tx.subscribe())),
        ];

        self.health.set_ready(true).await;
        self.logger
            .log_startup(env!("CARGO_PKG_VERSION"), self.config.scan_interval);
        handles
    }

    /// Stop the loops, cancel any in-flight scan and drop pending timers
    pub async fn shutdown(&self) {
        self.logger.log_shutdown("shutdown requested");
        let _ = self.shutdown_tx.send(());
        self.cancel_scan();
        self.auto_resolver.cancel_all();
        self.health.set_ready(false).await;
    }

    async fn scan_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.scan_interval;
        info!(interval_secs = period.as_secs(), "Starting scan loop");

        // First scan one period after start, then every period
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_scan_for("scheduled").await {
                        ScanOutcome::Completed(report) => {
                            debug!(alerts = report.alerts.len(), "Scheduled scan finished");
                        }
                        ScanOutcome::AlreadyRunning | ScanOutcome::Cancelled => {}
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scan loop");
                    self.health.set_unhealthy(components::SCANNER, "stopped").await;
                    break;
                }
            }
        }
    }

    async fn baseline_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.baseline_interval;
        info!(interval_secs = period.as_secs(), "Starting baseline refresh loop");

        // Fires immediately so the first scan finds baselines ready
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_baselines().await {
                        warn!(error = %e, "Baseline refresh failed, keeping previous values");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down baseline refresh loop");
                    break;
                }
            }
        }
    }

    async fn retention_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.retention_interval;
        info!(interval_secs = period.as_secs(), "Starting retention loop");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evict_expired();
                    match self.expire_events().await {
                        Ok(0) => {}
                        Ok(removed) => debug!(removed, "Expired raw activity events"),
                        Err(e) => warn!(error = %e, "Failed to expire raw activity events"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down retention loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::detector::testing::StubSource;
    use crate::engine::{AnomalyEngineBuilder, EngineConfig};
    use crate::health::ComponentStatus;
    use crate::notify::testing::RecordingNotifier;

    fn engine(source: StubSource) -> Arc<AnomalyEngine> {
        AnomalyEngineBuilder::new()
            .source(Arc::new(source))
            .notifier(Arc::new(RecordingNotifier::default()))
            .config(EngineConfig {
                scan_interval: Duration::from_secs(30),
                ..Default::default()
            })
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_loop_runs_on_interval() {
        let engine = engine(StubSource::default().heap(0.9));
        let handles = engine.start().await;
        assert!(engine.health().readiness().await.ready);

        // Nothing before the first period elapses
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(engine.store().is_empty());
        assert!(engine.baselines().is_computed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(engine.store().len(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(engine.store().len(), 2);

        engine.shutdown().await;
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(!engine.health().readiness().await.ready);
        assert_eq!(
            engine.health().status_of(components::SCANNER).await,
            Some(ComponentStatus::Unhealthy)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_scanning() {
        let engine = engine(StubSource::default().heap(0.9));
        let handles = engine.start().await;

        engine.shutdown().await;
        for handle in handles {
            handle.await.unwrap();
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(engine.store().is_empty());
    }
}
