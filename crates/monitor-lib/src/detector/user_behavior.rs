//! User behaviour detectors: login hours, login bursts, dormant accounts

use chrono::Duration;
use serde_json::json;

use super::ScanContext;
use crate::alert::{Category, DetectorType, Finding, Severity};
use crate::error::MetricsError;
use crate::models::EventKind;
use crate::source::{EventQuery, GroupBy, TimeWindow};

/// Logins in unusual hours above this count raise an alert
const UNUSUAL_LOGIN_MIN_COUNT: u64 = 5;

/// Events attached to an alert as evidence
const EVIDENCE_SAMPLE_SIZE: usize = 5;

/// Look-back for login-hour and dormant-activation checks
const DAY: i64 = 24;

/// Burst window for rapid logins
const RAPID_LOGIN_WINDOW_MINUTES: i64 = 5;

/// Absence that makes an account dormant
const DORMANT_AFTER_DAYS: i64 = 30;

pub(super) async fn unusual_login_times(ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    let hours = ctx.thresholds.login_frequency.unusual_hours;
    let query = EventQuery::new(
        Some(EventKind::Login),
        TimeWindow::last(Duration::hours(DAY), ctx.now),
    )
    .hours(hours);

    let count = ctx.source.count_events(&query).await?.total();
    if count <= UNUSUAL_LOGIN_MIN_COUNT {
        return Ok(Vec::new());
    }

    let sample = ctx.source.sample_events(&query, EVIDENCE_SAMPLE_SIZE).await?;
    Ok(vec![Finding::new(
        DetectorType::UnusualLoginTimes,
        Category::UserBehavior,
        Severity::Medium,
        format!(
            "{} logins detected during unusual hours ({:02}:00-{:02}:00 UTC)",
            count, hours.start, hours.end
        ),
        json!({ "count": count, "events": sample }),
    )])
}

pub(super) async fn rapid_login_attempts(ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    let max_logins = ctx.thresholds.login_frequency.max_logins_per_minute;
    let window = TimeWindow::last(Duration::minutes(RAPID_LOGIN_WINDOW_MINUTES), ctx.now);
    let query = EventQuery::new(Some(EventKind::Login), window).group_by(GroupBy::User);

    let per_user = ctx.source.count_events(&query).await?.into_groups();

    Ok(per_user
        .into_iter()
        .filter(|(_, attempts)| *attempts >= max_logins)
        .map(|(user, attempts)| {
            Finding::new(
                DetectorType::RapidLoginAttempts,
                Category::Security,
                Severity::High,
                format!(
                    "User {} attempted {} logins in {} minutes",
                    user, attempts, RAPID_LOGIN_WINDOW_MINUTES
                ),
                json!({
                    "userId": user,
                    "attempts": attempts,
                    "windowMinutes": RAPID_LOGIN_WINDOW_MINUTES,
                    "threshold": max_logins,
                }),
            )
            .with_subject(user)
        })
        .collect())
}

pub(super) async fn dormant_user_activation(
    ctx: &ScanContext,
) -> Result<Vec<Finding>, MetricsError> {
    let recent = TimeWindow::last(Duration::hours(DAY), ctx.now);
    let dormant = ctx
        .source
        .dormant_users(ctx.now - Duration::days(DORMANT_AFTER_DAYS), recent.start)
        .await?;
    if dormant.is_empty() {
        return Ok(Vec::new());
    }

    let query = EventQuery::new(Some(EventKind::Login), recent)
        .users(dormant.clone())
        .group_by(GroupBy::User);
    let activated: Vec<String> = ctx
        .source
        .count_events(&query)
        .await?
        .into_groups()
        .into_iter()
        .filter(|(user, logins)| *logins > 0 && dormant.contains(user))
        .map(|(user, _)| user)
        .collect();

    if activated.is_empty() {
        return Ok(Vec::new());
    }

    Ok(vec![Finding::new(
        DetectorType::DormantUserActivation,
        Category::UserBehavior,
        Severity::Medium,
        format!("{} previously dormant users became active", activated.len()),
        json!({
            "count": activated.len(),
            "users": activated.iter().take(EVIDENCE_SAMPLE_SIZE).collect::<Vec<_>>(),
            "dormantAfterDays": DORMANT_AFTER_DAYS,
        }),
    )])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::testing::StubSource;
    use crate::detector::{run, Baselines};
    use crate::thresholds::Thresholds;
    use chrono::Utc;
    use std::sync::Arc;

    fn context(source: StubSource, thresholds: Thresholds) -> ScanContext {
        ScanContext {
            source: Arc::new(source),
            thresholds: Arc::new(thresholds),
            baselines: Baselines::default(),
            now: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_rapid_logins_single_user_over_threshold() {
        let source = StubSource::default()
            .group(Some(EventKind::Login), "user-42", 12)
            .group(Some(EventKind::Login), "user-7", 3);
        let mut thresholds = Thresholds::default();
        thresholds.login_frequency.max_logins_per_minute = 10;

        let findings = run(DetectorType::RapidLoginAttempts, &context(source, thresholds))
            .await
            .unwrap();

        assert_eq!(findings.len(), 1);
        let finding = &findings[0];
        assert_eq!(finding.detector_type, DetectorType::RapidLoginAttempts);
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.subject.as_deref(), Some("user-42"));
        assert_eq!(finding.evidence["attempts"], 12);
    }

    #[tokio::test]
    async fn test_rapid_logins_threshold_is_inclusive() {
        let source = StubSource::default().group(Some(EventKind::Login), "user-1", 10);
        let findings = run(
            DetectorType::RapidLoginAttempts,
            &context(source, Thresholds::default()),
        )
        .await
        .unwrap();
        assert_eq!(findings.len(), 1);
    }

    #[tokio::test]
    async fn test_unusual_login_times_fires_above_five() {
        let quiet = StubSource::default().total(Some(EventKind::Login), 5);
        let findings = run(
            DetectorType::UnusualLoginTimes,
            &context(quiet, Thresholds::default()),
        )
        .await
        .unwrap();
        assert!(findings.is_empty());

        let busy = StubSource::default().total(Some(EventKind::Login), 6);
        let ctx = context(busy, Thresholds::default());
        let findings = run(DetectorType::UnusualLoginTimes, &ctx).await.unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert_eq!(findings[0].category, Category::UserBehavior);
        assert!(findings[0].description.contains("22:00-06:00"));
    }

    #[tokio::test]
    async fn test_unusual_login_query_uses_configured_hours() {
        let source = Arc::new(StubSource::default());
        let mut thresholds = Thresholds::default();
        thresholds.login_frequency.unusual_hours.start = 23;
        let ctx = ScanContext {
            source: source.clone(),
            thresholds: Arc::new(thresholds),
            baselines: Baselines::default(),
            now: Utc::now(),
        };

        run(DetectorType::UnusualLoginTimes, &ctx).await.unwrap();

        let queries = source.queries.lock().unwrap();
        assert_eq!(queries[0].filter.hours.map(|h| h.start), Some(23));
    }

    #[tokio::test]
    async fn test_dormant_activation_aggregates_users() {
        let mut source = StubSource::default()
            .group(Some(EventKind::Login), "sleeper-1", 1)
            .group(Some(EventKind::Login), "sleeper-2", 4)
            .group(Some(EventKind::Login), "regular", 9);
        source.dormant = vec!["sleeper-1".into(), "sleeper-2".into()];

        let findings = run(
            DetectorType::DormantUserActivation,
            &context(source, Thresholds::default()),
        )
        .await
        .unwrap();

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].evidence["count"], 2);
        assert_eq!(findings[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_no_dormant_users_no_finding() {
        let source = StubSource::default().group(Some(EventKind::Login), "regular", 9);
        let findings = run(
            DetectorType::DormantUserActivation,
            &context(source, Thresholds::default()),
        )
        .await
        .unwrap();
        assert!(findings.is_empty());
    }
}
