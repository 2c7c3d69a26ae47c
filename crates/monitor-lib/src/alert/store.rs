//! In-memory alert store
//!
//! All mutations take the write lock, so there is a single writer at a time.
//! Readers get clones, never references into the store.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Alert, AlertFilter, AlertStatus, Category, DetectorType, Finding, Severity};
use crate::error::AlertError;

/// Length of the random part of an alert id
const ID_RANDOM_LEN: usize = 6;

#[derive(Debug, Default)]
struct StoreInner {
    /// Alerts keyed by insertion sequence
    alerts: BTreeMap<u64, Alert>,
    /// Alert id -> insertion sequence
    ids: HashMap<String, u64>,
    next_seq: u64,
}

impl StoreInner {
    fn insert(&mut self, finding: Finding, now: DateTime<Utc>) -> Alert {
        let seq = self.next_seq;
        self.next_seq += 1;

        let random = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}_{}_{:x}{}",
            finding.detector_type,
            now.timestamp_millis(),
            seq,
            &random[..ID_RANDOM_LEN]
        );

        let alert = Alert::from_finding(id.clone(), finding, now);
        self.ids.insert(id, seq);
        self.alerts.insert(seq, alert.clone());
        alert
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Alert> {
        let seq = self.ids.get(id)?;
        self.alerts.get_mut(seq)
    }
}

/// Counts over the current alert population
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// Look-back period for alert trends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendPeriod {
    #[serde(rename = "24h")]
    Day,
    #[default]
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl TrendPeriod {
    pub fn duration(&self) -> Duration {
        match self {
            TrendPeriod::Day => Duration::hours(24),
            TrendPeriod::Week => Duration::days(7),
            TrendPeriod::Month => Duration::days(30),
        }
    }
}

impl FromStr for TrendPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(TrendPeriod::Day),
            "7d" => Ok(TrendPeriod::Week),
            "30d" => Ok(TrendPeriod::Month),
            other => Err(format!("unknown trend period '{}'", other)),
        }
    }
}

/// Alerts detected on one UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: String,
    pub total: usize,
    pub by_type: BTreeMap<DetectorType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

/// In-memory, insertion-ordered alert store
#[derive(Debug, Default)]
pub struct AlertStore {
    inner: RwLock<StoreInner>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Identify and store a single finding
    pub fn append(&self, finding: Finding, now: DateTime<Utc>) -> Alert {
        self.write().insert(finding, now)
    }

    /// Identify and store a whole scan batch under one lock acquisition
    pub fn append_batch(&self, findings: Vec<Finding>, now: DateTime<Utc>) -> Vec<Alert> {
        if findings.is_empty() {
            return Vec::new();
        }
        let mut inner = self.write();
        findings
            .into_iter()
            .map(|finding| inner.insert(finding, now))
            .collect()
    }

    /// Acknowledge an alert
    ///
    /// Re-acknowledging is a no-op success that keeps the original actor.
    pub fn acknowledge(
        &self,
        id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        if actor.trim().is_empty() {
            return Err(AlertError::InvalidActor);
        }

        let mut inner = self.write();
        let alert = inner
            .get_mut(id)
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        match alert.status {
            AlertStatus::Resolved => Err(AlertError::AlreadyResolved(id.to_string())),
            AlertStatus::Acknowledged => Ok(alert.clone()),
            AlertStatus::Active => {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_by = Some(actor.to_string());
                alert.acknowledged_at = Some(now);
                Ok(alert.clone())
            }
        }
    }

    /// Resolve an active or acknowledged alert; resolution is terminal
    pub fn resolve(
        &self,
        id: &str,
        resolution: &str,
        now: DateTime<Utc>,
    ) -> Result<Alert, AlertError> {
        let mut inner = self.write();
        let alert = inner
            .get_mut(id)
            .ok_or_else(|| AlertError::NotFound(id.to_string()))?;

        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::AlreadyResolved(id.to_string()));
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolution = Some(resolution.to_string());
        Ok(alert.clone())
    }

    /// Resolve only if the alert is still active; `None` when nothing changed
    pub fn resolve_if_active(
        &self,
        id: &str,
        resolution: &str,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let mut inner = self.write();
        let alert = inner.get_mut(id)?;
        if alert.status != AlertStatus::Active {
            return None;
        }

        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        alert.resolution = Some(resolution.to_string());
        Some(alert.clone())
    }

    pub fn get(&self, id: &str) -> Option<Alert> {
        let inner = self.read();
        let seq = inner.ids.get(id)?;
        inner.alerts.get(seq).cloned()
    }

    /// All active alerts in insertion order
    pub fn list_active(&self) -> Vec<Alert> {
        self.list(&AlertFilter {
            status: Some(AlertStatus::Active),
            ..Default::default()
        })
    }

    /// Alerts matching the filter in insertion order
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        self.read()
            .alerts
            .values()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> AlertStats {
        let inner = self.read();
        let mut stats = AlertStats {
            total: inner.alerts.len(),
            ..Default::default()
        };

        for alert in inner.alerts.values() {
            match alert.status {
                AlertStatus::Active => stats.active += 1,
                AlertStatus::Acknowledged => stats.acknowledged += 1,
                AlertStatus::Resolved => stats.resolved += 1,
            }
            *stats.by_category.entry(alert.category).or_default() += 1;
            *stats.by_severity.entry(alert.severity).or_default() += 1;
        }

        stats
    }

    /// Per-day alert counts for alerts detected within `period` of `now`
    pub fn trends(&self, period: TrendPeriod, now: DateTime<Utc>) -> Vec<TrendPoint> {
        let start = now - period.duration();
        let mut days: BTreeMap<String, TrendPoint> = BTreeMap::new();

        for alert in self.read().alerts.values() {
            if alert.detected_at < start {
                continue;
            }
            let date = alert.detected_at.format("%Y-%m-%d").to_string();
            let point = days.entry(date.clone()).or_insert_with(|| TrendPoint {
                date,
                total: 0,
                by_type: BTreeMap::new(),
                by_severity: BTreeMap::new(),
            });
            point.total += 1;
            *point.by_type.entry(alert.detector_type).or_default() += 1;
            *point.by_severity.entry(alert.severity).or_default() += 1;
        }

        days.into_values().collect()
    }

    /// Remove every alert detected before `now - max_age`, whatever its status
    pub fn evict_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - max_age;
        let mut inner = self.write();

        let expired: Vec<u64> = inner
            .alerts
            .iter()
            .filter(|(_, alert)| alert.detected_at < cutoff)
            .map(|(seq, _)| *seq)
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for seq in expired {
            if let Some(alert) = inner.alerts.remove(&seq) {
                inner.ids.remove(&alert.id);
                evicted.push(alert.id);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.read().alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
