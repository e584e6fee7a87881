//! Output formatting for the fleet CLI.

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a key/value listing, either as a table or as JSON
pub fn print_kv(format: OutputFormat, title: &str, pairs: &[(&str, String)]) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", title.bold());
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);
            for (key, value) in pairs {
                table.add_row(vec![Cell::new(key), Cell::new(value)]);
            }
            println!("{table}");
        }
        OutputFormat::Json => {
            let object: serde_json::Map<String, serde_json::Value> = pairs
                .iter()
                .map(|(key, value)| (key.to_string(), serde_json::Value::String(value.clone())))
                .collect();
            println!("{}", serde_json::to_string_pretty(&object)?);
        }
    }
    Ok(())
}

/// Print any serializable value; tables get one row per top-level field
pub fn print_value<T: serde::Serialize>(
    format: OutputFormat,
    title: &str,
    value: &T,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            let json = serde_json::to_value(value)?;
            let pairs: Vec<(String, String)> = match json {
                serde_json::Value::Object(map) => map
                    .into_iter()
                    .map(|(key, value)| (key, compact(&value)))
                    .collect(),
                other => vec![("value".to_string(), compact(&other))],
            };
            let borrowed: Vec<(&str, String)> = pairs
                .iter()
                .map(|(key, value)| (key.as_str(), value.clone()))
                .collect();
            print_kv(format, title, &borrowed)
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A green success line
pub fn print_ok(message: &str) {
    println!("{} {}", "ok:".green().bold(), message);
}
