//! Alert-related CLI commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{
    AcknowledgeRequest, Alert, AlertList, ApiClient, EngineStats, ResolveRequest, Trends,
};
use crate::output::{
    color_severity, color_status, format_time, print_json, print_success, print_table,
    print_warning, truncate, OutputFormat,
};

/// Row for alert tables
#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Detector")]
    detector: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Detected")]
    detected: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        Self {
            id: alert.id.clone(),
            detector: alert.detector_type.clone(),
            severity: color_severity(&alert.severity),
            status: color_status(&alert.status),
            subject: alert.subject.clone().unwrap_or_else(|| "-".to_string()),
            detected: format_time(&alert.detected_at),
            description: truncate(&alert.description, 60),
        }
    }
}

/// Row for the trends table
#[derive(Tabled)]
struct TrendRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Total")]
    total: usize,
    #[tabled(rename = "By Severity")]
    by_severity: String,
}

fn print_alerts(list: &AlertList, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(list),
        OutputFormat::Table => {
            let rows: Vec<AlertRow> = list.anomalies.iter().map(AlertRow::from).collect();
            print_table(&rows);
            println!("{} alert(s)", list.count);
            Ok(())
        }
    }
}

fn print_alert(alert: &Alert, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(alert),
        OutputFormat::Table => {
            println!("ID:          {}", alert.id.cyan());
            println!("Detector:    {}", alert.detector_type);
            println!("Severity:    {}", color_severity(&alert.severity));
            println!("Status:      {}", color_status(&alert.status));
            if let Some(by) = &alert.acknowledged_by {
                println!("Acked by:    {}", by);
            }
            if let Some(resolution) = &alert.resolution {
                println!("Resolution:  {}", resolution);
            }
            Ok(())
        }
    }
}

/// List active alerts
pub async fn list_active(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list: AlertList = client.get("api/v1/anomalies/active").await?;
    print_alerts(&list, format)
}

/// List alerts matching the given filters
pub async fn list_alerts(
    client: &ApiClient,
    status: Option<String>,
    category: Option<String>,
    severity: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let query: Vec<String> = [("status", status), ("category", category), ("severity", severity)]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("{}={}", key, v)))
        .collect();

    let path = if query.is_empty() {
        "api/v1/anomalies".to_string()
    } else {
        format!("api/v1/anomalies?{}", query.join("&"))
    };

    let list: AlertList = client.get(&path).await?;
    print_alerts(&list, format)
}

/// Show alert counts and scan state
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats: EngineStats = client.get("api/v1/anomalies/stats").await?;

    match format {
        OutputFormat::Json => print_json(&stats),
        OutputFormat::Table => {
            println!("{}", "Alert Statistics".bold());
            println!("{}", "=".repeat(40));
            println!("Total:          {}", stats.alerts.total);
            println!("Active:         {}", stats.alerts.active.to_string().red());
            println!("Acknowledged:   {}", stats.alerts.acknowledged.to_string().yellow());
            println!("Resolved:       {}", stats.alerts.resolved.to_string().green());
            println!();

            if !stats.alerts.by_severity.is_empty() {
                println!("{}", "By Severity".bold());
                for (severity, count) in &stats.alerts.by_severity {
                    println!("  {:<14}{}", color_severity(severity), count);
                }
                println!();
            }

            println!("{}", "Engine".bold());
            println!("{}", "-".repeat(40));
            let last_scan = stats
                .last_scan
                .as_ref()
                .map(format_time)
                .unwrap_or_else(|| "never".to_string());
            println!("Last scan:      {}", last_scan);
            println!("Scanning:       {}", stats.scanning);
            println!("Daily average:  {:.1}", stats.baselines.daily_average);
            println!("Hourly average: {:.1}", stats.baselines.hourly_average);
            println!("Auto-resolves:  {}", stats.pending_auto_resolves);
            Ok(())
        }
    }
}

/// Show daily alert counts for a period
pub async fn show_trends(client: &ApiClient, period: &str, format: OutputFormat) -> Result<()> {
    let trends: Trends = client
        .get(&format!("api/v1/anomalies/trends?period={}", period))
        .await?;

    match format {
        OutputFormat::Json => print_json(&trends),
        OutputFormat::Table => {
            println!("{} {}", "Alert trends over".bold(), trends.period.cyan());
            let rows: Vec<TrendRow> = trends
                .trends
                .iter()
                .map(|point| TrendRow {
                    date: point.date.clone(),
                    total: point.total,
                    by_severity: point
                        .by_severity
                        .iter()
                        .map(|(severity, count)| format!("{}={}", severity, count))
                        .collect::<Vec<_>>()
                        .join(" "),
                })
                .collect();
            print_table(&rows);
            Ok(())
        }
    }
}

/// Acknowledge an alert
pub async fn acknowledge(
    client: &ApiClient,
    id: &str,
    actor: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let alert: Alert = client
        .post(
            &format!("api/v1/anomalies/{}/acknowledge", id),
            &AcknowledgeRequest { actor },
        )
        .await?;

    if let OutputFormat::Table = format {
        print_success(&format!("Alert {} acknowledged", id));
    }
    print_alert(&alert, format)
}

/// Resolve an alert
pub async fn resolve(
    client: &ApiClient,
    id: &str,
    resolution: &str,
    format: OutputFormat,
) -> Result<()> {
    let alert: Alert = client
        .post(
            &format!("api/v1/anomalies/{}/resolve", id),
            &ResolveRequest {
                resolution: resolution.to_string(),
            },
        )
        .await?;

    if let OutputFormat::Table = format {
        print_success(&format!("Alert {} resolved", id));
    }
    print_alert(&alert, format)
}

/// Start an out-of-band scan
pub async fn trigger_scan(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response = client.trigger_scan().await?;

    match format {
        OutputFormat::Json => print_json(&response),
        OutputFormat::Table => {
            if response.status == "accepted" {
                print_success("Scan started");
            } else {
                print_warning("A scan is already running");
            }
            Ok(())
        }
    }
}
