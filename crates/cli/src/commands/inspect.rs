//! `inspect`: show how an upload is mapped and cleaned

use anyhow::{Context, Result};
use forecast_lib::{ColumnHints, ColumnMapping, Normalizer, SalesSeries};
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use super::HintArgs;
use crate::config::AppConfig;
use crate::ingest::read_csv;
use crate::output::{format_quantity, print_info, print_json, print_warning, render_table, OutputFormat};

#[derive(clap::Args, Debug, Clone)]
pub struct InspectArgs {
    /// CSV file with daily sales
    pub file: PathBuf,

    #[command(flatten)]
    pub hints: HintArgs,
}

/// Per-item summary, shared by the table and JSON output
#[derive(Debug, Serialize, Tabled)]
struct SeriesRow {
    #[tabled(rename = "Item")]
    item_id: String,
    #[tabled(rename = "Days")]
    days: usize,
    #[tabled(rename = "From")]
    start: String,
    #[tabled(rename = "To")]
    end: String,
    #[tabled(rename = "Mean/day")]
    mean: String,
    #[tabled(rename = "Imputed")]
    imputed: usize,
    #[tabled(rename = "Outliers")]
    outliers: usize,
    #[tabled(rename = "Anomalies")]
    anomalies: usize,
    #[tabled(rename = "Volatility")]
    volatility: String,
}

impl From<&SalesSeries> for SeriesRow {
    fn from(series: &SalesSeries) -> Self {
        let quantities = series.quantities();
        let mean = quantities.iter().sum::<f64>() / quantities.len().max(1) as f64;
        let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        Self {
            item_id: series.item_id().to_string(),
            days: series.len(),
            start: date(series.start_date()),
            end: date(series.end_date()),
            mean: format_quantity(mean),
            imputed: series.report().imputed_dates.len(),
            outliers: series.report().outliers.len(),
            anomalies: series.report().anomalies.len(),
            volatility: format!(
                "{} (cv {:.2})",
                series.report().volatility.level.label(),
                series.report().volatility.coefficient_of_variation
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct InspectReport<'a> {
    mapping: &'a ColumnMapping,
    dropped_rows: usize,
    items: Vec<SeriesRow>,
    series: &'a [SalesSeries],
}

pub fn run(args: InspectArgs, config: AppConfig, format: OutputFormat) -> Result<()> {
    let table = read_csv(&args.file)?;
    let normalizer = Normalizer::new(config.pipeline.normalizer);
    let hints: ColumnHints = args.hints.into();
    let series = normalizer
        .normalize(&table, &hints)
        .with_context(|| format!("Failed to normalize {}", args.file.display()))?;

    // normalize() never returns an empty list
    let Some(first) = series.first() else {
        anyhow::bail!("No usable rows in {}", args.file.display());
    };
    let report = first.report();
    let items: Vec<SeriesRow> = series.iter().map(SeriesRow::from).collect();

    match format {
        OutputFormat::Json => print_json(&InspectReport {
            mapping: &report.mapping,
            dropped_rows: report.dropped_rows,
            items,
            series: &series,
        })?,
        OutputFormat::Table => {
            print_info(&format!(
                "Columns: date = '{}', item = {}, quantity = '{}'",
                report.mapping.date,
                report
                    .mapping
                    .item
                    .as_deref()
                    .map(|i| format!("'{i}'"))
                    .unwrap_or_else(|| "(none, single series)".to_string()),
                report.mapping.quantity
            ));
            println!("{}", render_table(items));
            if report.dropped_rows > 0 {
                print_warning(&format!("{} row(s) dropped with unparseable dates", report.dropped_rows));
            }
        }
    }
    Ok(())
}
