//! Anomaly monitor CLI
//!
//! A command-line tool for inspecting and managing alerts, triggering
//! scans and tuning detector thresholds on a running monitor.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, thresholds};

/// Anomaly monitor CLI
#[derive(Parser)]
#[command(name = "amon")]
#[command(author, version, about = "CLI for the Anomaly Monitor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via AMON_API_URL env var)
    #[arg(long, env = "AMON_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and manage alerts
    #[command(subcommand)]
    Alerts(AlertCommands),

    /// Start an out-of-band anomaly scan
    Scan,

    /// View or change detector thresholds
    #[command(subcommand)]
    Thresholds(ThresholdCommands),
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// List active alerts
    Active,

    /// List alerts with optional filters
    List {
        /// Filter by status (active, acknowledged, resolved)
        #[arg(long)]
        status: Option<String>,

        /// Filter by category (user_behavior, traffic, security, performance)
        #[arg(long)]
        category: Option<String>,

        /// Filter by severity (low, medium, high, critical)
        #[arg(long)]
        severity: Option<String>,
    },

    /// Show alert counts and scan state
    Stats,

    /// Show daily alert counts
    Trends {
        /// Look-back period (24h, 7d, 30d)
        #[arg(long, default_value = "7d")]
        period: String,
    },

    /// Acknowledge an alert
    Ack {
        /// Alert ID
        id: String,

        /// Who is acknowledging (defaults to "system" on the server)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Resolve an alert
    Resolve {
        /// Alert ID
        id: String,

        /// Resolution text
        #[arg(long)]
        resolution: String,
    },
}

#[derive(Subcommand)]
pub enum ThresholdCommands {
    /// Show all thresholds or one category
    Get {
        /// Category (loginFrequency, traffic, security, performance)
        category: Option<String>,
    },

    /// Merge a JSON patch into the thresholds
    Set {
        /// Patch, e.g. '{"security": {"maxFailedLoginsPerUser": 3}}'
        patch: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let api_url = config::resolve_api_url(cli.api_url.as_deref())?;
    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Alerts(alert_cmd) => match alert_cmd {
            AlertCommands::Active => {
                alerts::list_active(&client, cli.format).await?;
            }
            AlertCommands::List {
                status,
                category,
                severity,
            } => {
                alerts::list_alerts(&client, status, category, severity, cli.format).await?;
            }
            AlertCommands::Stats => {
                alerts::show_stats(&client, cli.format).await?;
            }
            AlertCommands::Trends { period } => {
                alerts::show_trends(&client, &period, cli.format).await?;
            }
            AlertCommands::Ack { id, actor } => {
                alerts::acknowledge(&client, &id, actor, cli.format).await?;
            }
            AlertCommands::Resolve { id, resolution } => {
                alerts::resolve(&client, &id, &resolution, cli.format).await?;
            }
        },
        Commands::Scan => {
            alerts::trigger_scan(&client, cli.format).await?;
        }
        Commands::Thresholds(threshold_cmd) => match threshold_cmd {
            ThresholdCommands::Get { category } => {
                thresholds::get_thresholds(&client, category, cli.format).await?;
            }
            ThresholdCommands::Set { patch } => {
                thresholds::set_thresholds(&client, &patch, cli.format).await?;
            }
        },
    }

    Ok(())
}
