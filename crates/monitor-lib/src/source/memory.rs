//! In-memory activity log implementing [`MetricsSource`]

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CgroupMemoryReader, EventCount, EventQuery, GroupBy, MetricsSource};
use crate::error::MetricsError;
use crate::models::{ActivityEvent, EventKind, ProcessStats, UserRecord};

#[derive(Debug, Default)]
struct Inner {
    /// Events in arrival order
    events: Vec<ActivityEvent>,
    users: HashMap<String, UserRecord>,
}

/// Activity log and user directory held in process memory
#[derive(Debug, Default)]
pub struct InMemoryMetricsSource {
    inner: RwLock<Inner>,
    memory_reader: Option<CgroupMemoryReader>,
    fixed_stats: Option<ProcessStats>,
}

impl InMemoryMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read process memory from the given cgroup
    pub fn with_memory_reader(mut self, reader: CgroupMemoryReader) -> Self {
        self.memory_reader = Some(reader);
        self
    }

    /// Report fixed process stats instead of reading a cgroup
    pub fn with_process_stats(mut self, stats: ProcessStats) -> Self {
        self.fixed_stats = Some(stats);
        self
    }

    pub async fn record(&self, event: ActivityEvent) {
        self.inner.write().await.events.push(event);
    }

    pub async fn record_many(&self, events: impl IntoIterator<Item = ActivityEvent>) {
        self.inner.write().await.events.extend(events);
    }

    pub async fn upsert_user(&self, user: UserRecord) {
        self.inner
            .write()
            .await
            .users
            .insert(user.user_id.clone(), user);
    }

    /// Drop events older than `cutoff`; returns how many were removed
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.events.len();
        inner.events.retain(|e| e.timestamp >= cutoff);
        let removed = before - inner.events.len();
        if removed > 0 {
            debug!(removed, "Pruned expired activity events");
        }
        removed
    }

    pub async fn event_count(&self) -> usize {
        self.inner.read().await.events.len()
    }
}

fn group_key(event: &ActivityEvent, group_by: GroupBy) -> String {
    match group_by {
        GroupBy::User => event.user_id.clone(),
        GroupBy::Day => event.timestamp.format("%Y-%m-%d").to_string(),
        GroupBy::Hour => event.timestamp.format("%Y-%m-%d-%H").to_string(),
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetricsSource {
    async fn count_events(&self, query: &EventQuery) -> Result<EventCount, MetricsError> {
        let inner = self.inner.read().await;
        let matching = inner.events.iter().filter(|e| query.matches(e));

        Ok(match query.group_by {
            None => EventCount::Total(matching.count() as u64),
            Some(group_by) => {
                let mut groups = BTreeMap::new();
                for event in matching {
                    *groups.entry(group_key(event, group_by)).or_insert(0) += 1;
                }
                EventCount::Grouped(groups)
            }
        })
    }

    async fn sample_events(
        &self,
        query: &EventQuery,
        limit: usize,
    ) -> Result<Vec<ActivityEvent>, MetricsError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<ActivityEvent> = inner
            .events
            .iter()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn dormant_users(
        &self,
        last_seen_before: DateTime<Utc>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<String>, MetricsError> {
        let inner = self.inner.read().await;

        let mut last_login: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for user in inner.users.values() {
            if let Some(ts) = user.last_login.filter(|ts| *ts < as_of) {
                last_login.insert(user.user_id.as_str(), ts);
            }
        }
        for event in &inner.events {
            if event.action != EventKind::Login || event.timestamp >= as_of {
                continue;
            }
            let entry = last_login
                .entry(event.user_id.as_str())
                .or_insert(event.timestamp);
            if event.timestamp > *entry {
                *entry = event.timestamp;
            }
        }

        let mut dormant: Vec<String> = last_login
            .into_iter()
            .filter(|(_, ts)| *ts < last_seen_before)
            .map(|(user, _)| user.to_string())
            .collect();
        dormant.sort();
        Ok(dormant)
    }

    async fn process_stats(&self) -> Result<ProcessStats, MetricsError> {
        if let Some(stats) = self.fixed_stats {
            return Ok(stats);
        }
        match &self.memory_reader {
            Some(reader) => reader.read().await,
            None => Err(MetricsError::Unavailable(
                "no process memory reader configured".to_string(),
            )),
        }
    }

    async fn probe_latency(&self) -> Result<Duration, MetricsError> {
        let start = Instant::now();
        let inner = self.inner.read().await;
        let _ = inner.users.values().next();
        Ok(start.elapsed())
    }

    async fn expire_events_before(&self, cutoff: DateTime<Utc>) -> Result<usize, MetricsError> {
        Ok(self.prune_before(cutoff).await)
    }
}
