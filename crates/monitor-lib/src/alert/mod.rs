//! Alert model and in-memory alert store
//!
//! Detectors emit [`Finding`]s; the [`AlertStore`] turns them into
//! identified [`Alert`]s and owns their lifecycle:
//! active -> acknowledged -> resolved, or active -> resolved.

mod store;

pub use store::{AlertStats, AlertStore, TrendPeriod, TrendPoint};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detector that produced an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    UnusualLoginTimes,
    RapidLoginAttempts,
    DormantUserActivation,
    TrafficDrop,
    TrafficSpike,
    BruteForceAttempt,
    SuspiciousUserAgents,
    HighMemoryUsage,
    SlowDatabaseResponse,
}

impl DetectorType {
    /// Every detector run by a scan cycle
    pub const ALL: [DetectorType; 9] = [
        DetectorType::UnusualLoginTimes,
        DetectorType::RapidLoginAttempts,
        DetectorType::DormantUserActivation,
        DetectorType::TrafficDrop,
        DetectorType::TrafficSpike,
        DetectorType::BruteForceAttempt,
        DetectorType::SuspiciousUserAgents,
        DetectorType::HighMemoryUsage,
        DetectorType::SlowDatabaseResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorType::UnusualLoginTimes => "unusual_login_times",
            DetectorType::RapidLoginAttempts => "rapid_login_attempts",
            DetectorType::DormantUserActivation => "dormant_user_activation",
            DetectorType::TrafficDrop => "traffic_drop",
            DetectorType::TrafficSpike => "traffic_spike",
            DetectorType::BruteForceAttempt => "brute_force_attempt",
            DetectorType::SuspiciousUserAgents => "suspicious_user_agents",
            DetectorType::HighMemoryUsage => "high_memory_usage",
            DetectorType::SlowDatabaseResponse => "slow_database_response",
        }
    }
}

impl std::fmt::Display for DetectorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse alert grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    UserBehavior,
    Traffic,
    Security,
    Performance,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::UserBehavior => write!(f, "user_behavior"),
            Category::Traffic => write!(f, "traffic"),
            Category::Security => write!(f, "security"),
            Category::Performance => write!(f, "performance"),
        }
    }
}

/// Alert urgency, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Alert lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Candidate alert produced by a detector, before it is identified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub detector_type: DetectorType,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    /// Entity the finding is about (usually a user id), if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Detector-specific payload, passed through untouched
    pub evidence: serde_json::Value,
}

impl Finding {
    pub fn new(
        detector_type: DetectorType,
        category: Category,
        severity: Severity,
        description: impl Into<String>,
        evidence: serde_json::Value,
    ) -> Self {
        Self {
            detector_type,
            category,
            severity,
            description: description.into(),
            subject: None,
            evidence,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// An identified finding tracked by the alert store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub detector_type: DetectorType,
    pub category: Category,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub evidence: serde_json::Value,
    pub detected_at: DateTime<Utc>,
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl Alert {
    fn from_finding(id: String, finding: Finding, detected_at: DateTime<Utc>) -> Self {
        Self {
            id,
            detector_type: finding.detector_type,
            category: finding.category,
            severity: finding.severity,
            description: finding.description,
            subject: finding.subject,
            evidence: finding.evidence,
            detected_at,
            status: AlertStatus::Active,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }
}

/// Filter for alert listing; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertFilter {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| alert.status == s)
            && self.category.map_or(true, |c| alert.category == c)
            && self.severity.map_or(true, |s| alert.severity == s)
    }
}
