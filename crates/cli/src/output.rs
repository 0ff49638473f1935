//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use forecast_lib::MetricValue;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Render rows as a rounded table
pub fn render_table<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a quantity with one decimal
pub fn format_quantity(value: f64) -> String {
    format!("{:.1}", value)
}

/// Format a weight as a percentage
pub fn format_weight(weight: f64) -> String {
    format!("{:.1}%", weight * 100.0)
}

/// Format a metric, showing the unavailable marker as a dash
pub fn format_metric(value: MetricValue) -> String {
    match value {
        MetricValue::Available(v) => format!("{:.2}", v),
        MetricValue::Unavailable => "-".dimmed().to_string(),
    }
}

/// Color a percentage error: green under 10%, yellow under 20%, red otherwise
pub fn color_error(mape: f64) -> String {
    let formatted = format!("{:.2}%", mape);
    if mape < 10.0 {
        formatted.green().to_string()
    } else if mape < 20.0 {
        formatted.yellow().to_string()
    } else {
        formatted.red().to_string()
    }
}

/// Color model status
pub fn color_status(status: &str) -> String {
    match status {
        "included" => status.green().to_string(),
        "excluded" => status.red().to_string(),
        _ => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatters() {
        colored::control::set_override(false);
        assert_eq!(format_quantity(12.345), "12.3");
        assert_eq!(format_weight(0.25), "25.0%");
        assert_eq!(format_metric(MetricValue::Available(3.14159)), "3.14");
        assert_eq!(format_metric(MetricValue::Unavailable), "-");
        assert_eq!(color_error(4.5), "4.50%");
        assert_eq!(color_status("included"), "included");
    }
}
