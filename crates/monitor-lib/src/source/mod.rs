//! Metrics source contract
//!
//! The engine never owns activity data. Detectors query a [`MetricsSource`]
//! for time-windowed counts and samples; any failure is treated as transient.

mod memory;
mod process;

pub use memory::InMemoryMetricsSource;
pub use process::CgroupMemoryReader;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MetricsError;
use crate::models::{ActivityEvent, EventKind, ProcessStats};
use crate::thresholds::HourRange;

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window covering the `span` immediately before `now`
    pub fn last(span: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - span,
            end: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Grouping key for counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    User,
    /// `%Y-%m-%d`
    Day,
    /// `%Y-%m-%d-%H`
    Hour,
}

/// Extra constraints on matching events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    /// Restrict to these user ids
    pub users: Option<Vec<String>>,
    /// Restrict to events whose UTC hour falls in this range
    pub hours: Option<HourRange>,
    /// Case-insensitive user-agent substrings; any match passes
    pub user_agent_patterns: Vec<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &ActivityEvent) -> bool {
        use chrono::Timelike;

        if let Some(users) = &self.users {
            if !users.iter().any(|u| u == &event.user_id) {
                return false;
            }
        }
        if let Some(hours) = &self.hours {
            if !hours.contains(event.timestamp.hour()) {
                return false;
            }
        }
        if !self.user_agent_patterns.is_empty() {
            let Some(agent) = &event.user_agent else {
                return false;
            };
            let agent = agent.to_lowercase();
            if !self
                .user_agent_patterns
                .iter()
                .any(|p| agent.contains(&p.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

/// A count or sample query against the activity log
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    /// `None` matches every kind of event
    pub kind: Option<EventKind>,
    pub window: TimeWindow,
    pub filter: EventFilter,
    pub group_by: Option<GroupBy>,
}

impl EventQuery {
    pub fn new(kind: Option<EventKind>, window: TimeWindow) -> Self {
        Self {
            kind,
            window,
            filter: EventFilter::default(),
            group_by: None,
        }
    }

    pub fn group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    pub fn users(mut self, users: Vec<String>) -> Self {
        self.filter.users = Some(users);
        self
    }

    pub fn hours(mut self, hours: HourRange) -> Self {
        self.filter.hours = Some(hours);
        self
    }

    pub fn user_agents(mut self, patterns: Vec<String>) -> Self {
        self.filter.user_agent_patterns = patterns;
        self
    }

    pub fn matches(&self, event: &ActivityEvent) -> bool {
        self.kind.map_or(true, |k| event.action == k)
            && self.window.contains(event.timestamp)
            && self.filter.matches(event)
    }
}

/// Result of a count query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCount {
    Total(u64),
    Grouped(BTreeMap<String, u64>),
}

impl EventCount {
    /// Sum over all groups
    pub fn total(&self) -> u64 {
        match self {
            EventCount::Total(n) => *n,
            EventCount::Grouped(groups) => groups.values().sum(),
        }
    }

    /// Per-group counts; an ungrouped result yields no groups
    pub fn into_groups(self) -> BTreeMap<String, u64> {
        match self {
            EventCount::Total(_) => BTreeMap::new(),
            EventCount::Grouped(groups) => groups,
        }
    }
}

/// Queryable source of activity and process metrics
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Count matching events, optionally grouped
    async fn count_events(&self, query: &EventQuery) -> Result<EventCount, MetricsError>;

    /// Up to `limit` matching events, newest first
    async fn sample_events(
        &self,
        query: &EventQuery,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, MetricsError>;

    /// Users whose last login before `as_of` is older than `last_seen_before`
    async fn dormant_users(
        &self,
        last_seen_before: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<String>, MetricsError>;

    /// Memory usage of the monitored process
    async fn process_stats(&self) -> Result<ProcessStats, MetricsError>;

    /// Round-trip time of a trivial read against the backing store
    async fn probe_latency(&self) -> Result<Duration, MetricsError>;

    /// Drop raw events older than `cutoff`, if the source owns its data
    async fn expire_events_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, MetricsError> {
        Ok(0)
    }
}
