//! Security detectors: failed-login bursts and crawler user agents

use std::collections::BTreeSet;

use chrono::Duration;
use serde_json::json;

use super::ScanContext;
use crate::alert::{Category, DetectorType, Finding, Severity};
use crate::error::MetricsError;
use crate::models::EventKind;
use crate::source::{EventQuery, GroupBy, TimeWindow};

/// Matching requests attached to a user-agent alert
const USER_AGENT_SAMPLE: usize = 10;

pub(super) async fn brute_force_attempt(ctx: &ScanContext) -> Result<Vec<Finding>, MetricsError> {
    let max_failed = ctx.thresholds.security.max_failed_logins_per_user;
    let window = TimeWindow::last(Duration::hours(1), ctx.now);

    let per_user = ctx
        .source
        .count_events(&EventQuery::new(Some(EventKind::LoginFailed), window).group_by(GroupBy::User))
        .await?
        .into_groups();

    let mut findings = Vec::new();
    for (user, attempts) in per_user {
        if attempts < max_failed {
            continue;
        }

        // Every failure in the window, so distributed sources are all listed
        let failures = ctx
            .source
            .sample_events(
                &EventQuery::new(Some(EventKind::LoginFailed), window).users(vec![user.clone()]),
                usize::try_from(attempts).unwrap_or(usize::MAX),
            )
            .await?;
        let ips: BTreeSet<&str> = failures.iter().filter_map(|e| e.ip_address.as_deref()).collect();
        let agents: BTreeSet<&str> = failures
            .iter()
            .filter_map(|e| e.user_agent.as_deref())
            .collect();

        findings.push(
            Finding::new(
                DetectorType::BruteForceAttempt,
                Category::Security,
                Severity::Critical,
                format!(
                    "Possible brute force: {} failed logins for user {} in the last hour",
                    attempts, user
                ),
                json!({
                    "userId": user,
                    "failedAttempts": attempts,
                    "ipAddresses": ips,
                    "userAgents": agents,
                    "threshold": max_failed,
                }),
            )
            .with_subject(user),
        );
    }
    Ok(findings)
}

pub(super) async fn suspicious_user_agents(
    ctx: &ScanContext,
) -> Result<Vec<Finding>, MetricsError> {
    let patterns = &ctx.thresholds.security.suspicious_user_agent_patterns;
    if patterns.is_empty() {
        return Ok(Vec::new());
    }

    let query = EventQuery::new(None, TimeWindow::last(Duration::hours(1), ctx.now))
        .user_agents(patterns.clone());
    let matched = ctx.source.count_events(&query).await?.total();
    if matched == 0 {
        return Ok(Vec::new());
    }
    let sample = ctx.source.sample_events(&query, USER_AGENT_SAMPLE).await?;

    Ok(vec![Finding::new(
        DetectorType::SuspiciousUserAgents,
        Category::Security,
        Severity::Medium,
        format!("{} requests with suspicious user agents detected", matched),
        json!({
            "count": matched,
            "patterns": patterns,
            "events": sample,
        }),
    )])
}
