//! Threshold CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct ThresholdRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Flatten nested threshold JSON into dotted keys
fn flatten(prefix: &str, value: &Value, rows: &mut Vec<ThresholdRow>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, inner, rows);
            }
        }
        other => rows.push(ThresholdRow {
            key: prefix.to_string(),
            value: other.to_string(),
        }),
    }
}

fn print_thresholds(value: &Value, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(value),
        OutputFormat::Table => {
            let mut rows = Vec::new();
            flatten("", value, &mut rows);
            print_table(&rows);
            Ok(())
        }
    }
}

/// Show all thresholds or a single category
pub async fn get_thresholds(
    client: &ApiClient,
    category: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = match &category {
        Some(c) => format!("api/v1/thresholds/{}", c),
        None => "api/v1/thresholds".to_string(),
    };
    let thresholds: Value = client.get(&path).await?;

    if let (OutputFormat::Table, Some(c)) = (format, &category) {
        println!("{} {}", "Thresholds:".bold(), c.cyan());
    }
    print_thresholds(&thresholds, format)
}

/// Merge a JSON patch into the thresholds
pub async fn set_thresholds(client: &ApiClient, patch: &str, format: OutputFormat) -> Result<()> {
    let patch: Value = serde_json::from_str(patch).context("Threshold patch is not valid JSON")?;
    let updated: Value = client.put("api/v1/thresholds", &patch).await?;

    if let OutputFormat::Table = format {
        print_success("Thresholds updated");
    }
    print_thresholds(&updated, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_keys() {
        let mut rows = Vec::new();
        flatten(
            "",
            &json!({"security": {"maxFailedLoginsPerUser": 5, "patterns": ["bot"]}}),
            &mut rows,
        );

        let keys: Vec<&str> = rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["security.maxFailedLoginsPerUser", "security.patterns"]);
        assert_eq!(rows[1].value, r#"["bot"]"#);
    }
}
