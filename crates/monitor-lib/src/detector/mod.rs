//! Anomaly detectors
//!
//! Each detector is a read-only function of a [`ScanContext`] (metrics source,
//! threshold snapshot, traffic baselines, scan time) producing zero or more
//! [`Finding`]s. The set is closed: [`DetectorType::ALL`] lists every detector
//! and [`run`] dispatches on it.

mod performance;
mod security;
mod traffic;
mod user_behavior;

pub use traffic::Baselines;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::alert::{DetectorType, Finding};
use crate::error::MetricsError;
use crate::source::MetricsSource;
use crate::thresholds::Thresholds;

/// Everything a detector may read during one scan
#[derive(Clone)]
pub struct ScanContext {
    pub source: Arc<dyn MetricsSource>,
    pub thresholds: Arc<Thresholds>,
    pub baselines: Baselines,
    pub now: DateTime<Utc>,
}

/// Run a single detector
pub async fn run(kind: DetectorType, ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    match kind {
        DetectorType::UnusualLoginTimes => user_behavior::unusual_login_times(ctx).await,
        DetectorType::RapidLoginAttempts => user_behavior::rapid_login_attempts(ctx).await,
        DetectorType::DormantUserActivation => user_behavior::dormant_user_activation(ctx).await,
        DetectorType::TrafficDrop => traffic::traffic_drop(ctx).await,
        DetectorType::TrafficSpike => traffic::traffic_spike(ctx).await,
        DetectorType::BruteForceAttempt => security::brute_force_attempt(ctx).await,
        DetectorType::SuspiciousUserAgents => security::suspicious_user_agents(ctx).await,
        DetectorType::HighMemoryUsage => performance::high_memory_usage(ctx).await,
        DetectorType::SlowDatabaseResponse => performance::slow_database_response(ctx).await,
    }
}
