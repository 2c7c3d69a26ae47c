//! Traffic volume detectors and the baselines they compare against

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use super::ScanContext;
use crate::alert::{Category, DetectorType, Finding, Severity};
use crate::error::MetricsError;
use crate::source::{EventQuery, GroupBy, MetricsSource, TimeWindow};

const DAILY_BASELINE_DAYS: i64 = 30;
const HOURLY_BASELINE_DAYS: i64 = 7;

/// Historical activity averages
///
/// Averages are taken over non-empty buckets only. Zero means "no history"
/// and disables the detector that depends on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Baselines {
    /// Mean events per day over the last 30 days
    pub daily_average: f64,
    /// Mean events per hour over the last 7 days
    pub hourly_average: f64,
    pub computed_at: Option<DateTime<Utc>>,
}

impl Baselines {
    pub async fn compute(
        source: &dyn MetricsSource,
        now: DateTime<Utc>,
    ) -> Result<Self, MetricsError> {
        let daily = source
            .count_events(
                &EventQuery::new(None, TimeWindow::last(Duration::days(DAILY_BASELINE_DAYS), now))
                    .group_by(GroupBy::Day),
            )
            .await?
            .into_groups();
        let hourly = source
            .count_events(
                &EventQuery::new(
                    None,
                    TimeWindow::last(Duration::days(HOURLY_BASELINE_DAYS), now),
                )
                .group_by(GroupBy::Hour),
            )
            .await?
            .into_groups();

        let baselines = Self {
            daily_average: bucket_mean(daily.values()),
            hourly_average: bucket_mean(hourly.values()),
            computed_at: Some(now),
        };
        debug!(
            daily_average = baselines.daily_average,
            hourly_average = baselines.hourly_average,
            "Computed traffic baselines"
        );
        Ok(baselines)
    }

    pub fn is_computed(&self) -> bool {
        self.computed_at.is_some()
    }
}

fn bucket_mean<'a>(buckets: impl Iterator<Item = &'a u64>) -> f64 {
    let (sum, n) = buckets
        .filter(|count| **count > 0)
        .fold((0u64, 0u64), |(sum, n), count| (sum + count, n + 1));
    if n == 0 {
        0.0
    } else {
        sum as f64 / n as f64
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

pub(super) async fn traffic_drop(ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    let average = ctx.baselines.daily_average;
    if average <= 0.0 {
        return Ok(Vec::new());
    }

    let today = TimeWindow {
        start: start_of_day(ctx.now),
        end: ctx.now,
    };
    let today_activity = ctx
        .source
        .count_events(&EventQuery::new(None, today))
        .await?
        .total();

    let drop_percent = (average - today_activity as f64) / average * 100.0;
    let threshold = ctx.thresholds.traffic.daily_active_users_drop_percent;
    if drop_percent <= threshold {
        return Ok(Vec::new());
    }

    Ok(vec![Finding::new(
        DetectorType::TrafficDrop,
        Category::Traffic,
        Severity::High,
        format!(
            "Traffic dropped {:.1}% below the daily average",
            drop_percent
        ),
        json!({
            "todayActivity": today_activity,
            "averageActivity": average,
            "dropPercentage": drop_percent,
            "threshold": threshold,
        }),
    )])
}

pub(super) async fn traffic_spike(ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    let average = ctx.baselines.hourly_average;
    if average <= 0.0 {
        return Ok(Vec::new());
    }

    let last_hour = ctx
        .source
        .count_events(&EventQuery::new(
            None,
            TimeWindow::last(Duration::hours(1), ctx.now),
        ))
        .await?
        .total();

    let multiplier = last_hour as f64 / average;
    let threshold = ctx.thresholds.traffic.page_view_spike_multiplier;
    if multiplier <= threshold {
        return Ok(Vec::new());
    }

    Ok(vec![Finding::new(
        DetectorType::TrafficSpike,
        Category::Traffic,
        Severity::Medium,
        format!("Traffic spike: {:.1}x the hourly average", multiplier),
        json!({
            "currentHourActivity": last_hour,
            "averageHourlyActivity": average,
            "spikeMultiplier": multiplier,
            "threshold": threshold,
        }),
    )])
}
