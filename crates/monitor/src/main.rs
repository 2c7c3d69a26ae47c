//! Anomaly monitor daemon
//!
//! Runs the periodic anomaly scan over ingested activity and process memory,
//! notifies on new alerts and serves the alert API.

use std::sync::Arc;
use std::time::Duration;

use anomaly_monitor::{api, config::MonitorConfig};
use anyhow::Result;
use monitor_lib::{
    AnomalyEngine, CgroupMemoryReader, FanoutNotifier, InMemoryMetricsSource, LogNotifier,
    Notifier, WebhookNotifier,
};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON output with env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting anomaly-monitor");

    let config = MonitorConfig::load()?;
    let thresholds = config.load_thresholds()?;
    info!(instance = %config.instance, api_port = config.api_port, "Monitor configured");

    let source = Arc::new(
        InMemoryMetricsSource::new().with_memory_reader(CgroupMemoryReader::new(&config.cgroup_path)),
    );

    let log_notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let notifier: Arc<dyn Notifier> = match &config.webhook_url {
        Some(url) => {
            let webhook = WebhookNotifier::new(url, Duration::from_secs(config.notify_timeout_secs))?
                .with_dedup_window(config.webhook_dedup_window())
                .with_instance(&config.instance);
            info!(url = %url, "Webhook notifications enabled");
            Arc::new(FanoutNotifier::new(vec![log_notifier, Arc::new(webhook)]))
        }
        None => log_notifier,
    };

    let engine = AnomalyEngine::builder()
        .source(source.clone())
        .notifier(notifier)
        .thresholds(thresholds)
        .config(config.engine_config())
        .instance(&config.instance)
        .build()?;

    let loops = engine.start().await;

    let state = Arc::new(api::AppState::new(Arc::clone(&engine), source));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(api::serve(config.api_port, state, async move {
        let _ = stop_rx.await;
    }));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    engine.shutdown().await;
    let _ = stop_tx.send(());

    for handle in loops {
        if let Err(e) = handle.await {
            warn!(error = %e, "Engine loop ended abnormally");
        }
    }
    server.await??;

    Ok(())
}
