//! Activity data models consumed by the detectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of user activity recorded in the activity log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Login,
    LoginFailed,
    Logout,
    Register,
    ViewProduct,
    AddToCart,
    Purchase,
    Search,
    ProfileUpdate,
    PasswordChange,
    AdminAction,
    ExportData,
}

/// A single activity log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub user_id: String,
    pub action: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl ActivityEvent {
    /// Create a successful event with no request metadata
    pub fn new(user_id: impl Into<String>, action: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            action,
            timestamp,
            ip_address: None,
            user_agent: None,
            session_id: None,
            success: action != EventKind::LoginFailed,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// User directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: String,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

/// Memory figures for the monitored process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStats {
    pub used_bytes: u64,
    pub limit_bytes: u64,
}

impl ProcessStats {
    /// Fraction of the limit currently in use (0 when no limit is known)
    pub fn used_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}
