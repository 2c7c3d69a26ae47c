//! Performance detectors: process memory and backing-store latency

use serde_json::json;

use super::ScanContext;
use crate::alert::{Category, DetectorType, Finding, Severity};
use crate::error::MetricsError;

pub(super) async fn high_memory_usage(ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    let stats = ctx.source.process_stats().await?;
    let used_percent = stats.used_ratio() * 100.0;
    let threshold = ctx.thresholds.performance.high_memory_usage_percent;
    if used_percent <= threshold {
        return Ok(Vec::new());
    }

    Ok(vec![Finding::new(
        DetectorType::HighMemoryUsage,
        Category::Performance,
        Severity::Medium,
        format!("High memory usage: {:.1}%", used_percent),
        json!({
            "usedBytes": stats.used_bytes,
            "limitBytes": stats.limit_bytes,
            "usagePercent": used_percent,
            "threshold": threshold,
        }),
    )])
}

pub(super) async fn slow_database_response(
    ctx: &ScanContext,
) -> Result<Vec<Finding>, MetricsError> {
    let latency = ctx.source.probe_latency().await?;
    let latency_ms = latency.as_millis() as u64;
    let threshold = ctx.thresholds.performance.slow_query_threshold_ms;
    if latency_ms <= threshold {
        return Ok(Vec::new());
    }

    Ok(vec![Finding::new(
        DetectorType::SlowDatabaseResponse,
        Category::Performance,
        Severity::Medium,
        format!("Slow database response: {}ms", latency_ms),
        json!({
            "responseTimeMs": latency_ms,
            "threshold": threshold,
        }),
    )])
}
