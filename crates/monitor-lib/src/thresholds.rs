//! Threshold registry
//!
//! Holds the named detector thresholds, grouped by category. Updates are
//! partial deep merges published copy-on-write: a scan keeps the snapshot it
//! started with while later scans see the new values.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ThresholdError;

/// Hour-of-day range, end exclusive; wraps midnight when `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HourRange {
    #[serde(alias = "min")]
    pub start: u32,
    #[serde(alias = "max")]
    pub end: u32,
}

impl HourRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct LoginThresholds {
    pub unusual_hours: HourRange,
    pub max_logins_per_minute: u64,
    pub suspicious_location_jump_km: f64,
}

impl Default for LoginThresholds {
    fn default() -> Self {
        Self {
            unusual_hours: HourRange::new(22, 6),
            max_logins_per_minute: 10,
            suspicious_location_jump_km: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TrafficThresholds {
    pub daily_active_users_drop_percent: f64,
    pub page_view_spike_multiplier: f64,
    pub error_rate_threshold: f64,
}

impl Default for TrafficThresholds {
    fn default() -> Self {
        Self {
            daily_active_users_drop_percent: 30.0,
            page_view_spike_multiplier: 5.0,
            error_rate_threshold: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SecurityThresholds {
    pub max_failed_logins_per_user: u64,
    pub max_failed_logins_global: u64,
    pub suspicious_user_agent_patterns: Vec<String>,
}

impl Default for SecurityThresholds {
    fn default() -> Self {
        Self {
            max_failed_logins_per_user: 5,
            max_failed_logins_global: 50,
            suspicious_user_agent_patterns: vec![
                "bot".to_string(),
                "crawler".to_string(),
                "spider".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PerformanceThresholds {
    pub slow_query_threshold_ms: u64,
    pub high_memory_usage_percent: f64,
    pub response_time_threshold_ms: u64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 2000,
            high_memory_usage_percent: 85.0,
            response_time_threshold_ms: 1000,
        }
    }
}

/// Complete set of detector thresholds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Thresholds {
    pub login_frequency: LoginThresholds,
    pub traffic: TrafficThresholds,
    pub security: SecurityThresholds,
    pub performance: PerformanceThresholds,
}

/// Threshold category names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThresholdCategory {
    LoginFrequency,
    Traffic,
    Security,
    Performance,
}

impl Thresholds {
    /// One category as JSON
    pub fn category(&self, category: ThresholdCategory) -> Value {
        let value = match category {
            ThresholdCategory::LoginFrequency => serde_json::to_value(&self.login_frequency),
            ThresholdCategory::Traffic => serde_json::to_value(&self.traffic),
            ThresholdCategory::Security => serde_json::to_value(&self.security),
            ThresholdCategory::Performance => serde_json::to_value(&self.performance),
        };
        // Plain structs of numbers and strings always serialize
        value.unwrap_or(Value::Null)
    }

    /// Deep-merge a partial JSON object into a copy of these thresholds
    pub fn merged(&self, patch: &Value) -> Result<Thresholds, ThresholdError> {
        if !patch.is_object() {
            return Err(ThresholdError::NotAnObject);
        }
        let mut current = serde_json::to_value(self)?;
        merge_json(&mut current, patch);
        let merged: Thresholds = serde_json::from_value(current)?;
        merged.validate()?;
        Ok(merged)
    }

    /// Reject values that would disable a detector or make it fire on everything
    pub fn validate(&self) -> Result<(), ThresholdError> {
        let login = &self.login_frequency;
        for (name, hour) in [
            ("loginFrequency.unusualHours.start", login.unusual_hours.start),
            ("loginFrequency.unusualHours.end", login.unusual_hours.end),
        ] {
            if hour > 23 {
                return Err(out_of_range(name, "must be an hour between 0 and 23"));
            }
        }

        for (name, value) in [
            ("loginFrequency.maxLoginsPerMinute", login.max_logins_per_minute),
            ("security.maxFailedLoginsPerUser", self.security.max_failed_logins_per_user),
            ("security.maxFailedLoginsGlobal", self.security.max_failed_logins_global),
            ("performance.slowQueryThresholdMs", self.performance.slow_query_threshold_ms),
            ("performance.responseTimeThresholdMs", self.performance.response_time_threshold_ms),
        ] {
            if value < 1 {
                return Err(out_of_range(name, "must be at least 1"));
            }
        }

        for (name, value) in [
            ("loginFrequency.suspiciousLocationJumpKm", login.suspicious_location_jump_km),
            ("traffic.dailyActiveUsersDropPercent", self.traffic.daily_active_users_drop_percent),
            ("traffic.pageViewSpikeMultiplier", self.traffic.page_view_spike_multiplier),
            ("traffic.errorRateThreshold", self.traffic.error_rate_threshold),
            ("performance.highMemoryUsagePercent", self.performance.high_memory_usage_percent),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(out_of_range(name, "must be greater than 0"));
            }
        }

        Ok(())
    }
}

fn out_of_range(name: &str, reason: &str) -> ThresholdError {
    ThresholdError::OutOfRange(format!("{} {}", name, reason))
}

/// Recursively merge `patch` into `target`; non-object values replace
fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Shared, copy-on-write threshold registry
#[derive(Debug, Default)]
pub struct ThresholdRegistry {
    current: RwLock<Arc<Thresholds>>,
}

impl ThresholdRegistry {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            current: RwLock::new(Arc::new(thresholds)),
        }
    }

    /// Current thresholds; never observes a partially applied update
    pub fn snapshot(&self) -> Arc<Thresholds> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, category: ThresholdCategory) -> Value {
        self.snapshot().category(category)
    }

    /// Merge a partial update; invalid patches leave the registry untouched
    pub fn update(&self, patch: &Value) -> Result<Arc<Thresholds>, ThresholdError> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let merged = Arc::new(current.merged(patch)?);
        *current = merged.clone();
        Ok(merged)
    }
}
