//! `forecast`: run the ensemble over an upload

use anyhow::{Context, Result};
use forecast_lib::{
    explain_checked, ColumnHints, ExplanationRequest, Explainer, ForecastPipeline, ItemForecast,
    ModelStatus, PipelineOptions, StructuredLogger, TemplateExplainer,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tabled::Tabled;
use tracing::{info, warn};

use super::HintArgs;
use crate::config::AppConfig;
use crate::explainer::HttpExplainer;
use crate::ingest::read_csv;
use crate::output::{
    color_error, color_status, format_metric, format_quantity, format_weight, print_error,
    print_info, print_json, print_success, print_warning, render_table, OutputFormat,
};

#[derive(clap::Args, Debug, Clone)]
pub struct ForecastArgs {
    /// CSV file with daily sales
    pub file: PathBuf,

    #[command(flatten)]
    pub hints: HintArgs,

    /// Only forecast this item
    #[arg(long, short)]
    pub item: Option<String>,

    /// Days to forecast
    #[arg(long, default_value_t = forecast_lib::ensemble::DEFAULT_HORIZON)]
    pub horizon: usize,

    /// Days held out when backtesting each model (overrides config)
    #[arg(long)]
    pub holdout: Option<usize>,

    /// Training seed (overrides config)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Hold out the last `horizon` days and score the forecast against them
    #[arg(long)]
    pub evaluate: bool,

    /// Add a plain-language explanation per item
    #[arg(long)]
    pub explain: bool,

    /// Give up on an item after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Row for the model table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Backtest MAPE")]
    backtest_error: String,
    #[tabled(rename = "Weight")]
    weight: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Row for the daily forecast table
#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Day")]
    day: u32,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Forecast")]
    forecast: String,
    #[tabled(rename = "Low")]
    low: String,
    #[tabled(rename = "High")]
    high: String,
}

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Debug, Serialize)]
struct FailureEntry {
    item_id: Option<String>,
    error: String,
}

#[derive(Debug, Serialize)]
struct ForecastReport<'a> {
    source: String,
    items: &'a [ItemForecast],
    failures: Vec<FailureEntry>,
    explanations: BTreeMap<String, String>,
}

pub async fn run(args: ForecastArgs, mut config: AppConfig, format: OutputFormat) -> Result<()> {
    if let Some(holdout) = args.holdout {
        config.pipeline.ensemble.holdout_days = holdout;
    }
    if let Some(seed) = args.seed {
        config.pipeline.ensemble.seed = seed;
    }

    let table = read_csv(&args.file)?;
    let source = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.display().to_string());
    info!(source = %source, rows = table.rows.len(), "Loaded upload");

    let pipeline = ForecastPipeline::new(config.pipeline.clone())
        .context("Invalid pipeline configuration")?
        .with_logger(StructuredLogger::new(&source));
    let options = PipelineOptions {
        horizon: args.horizon,
        item: args.item.clone(),
        evaluate_tail: args.evaluate,
        timeout: args.timeout_secs.map(Duration::from_secs),
    };
    let hints: ColumnHints = args.hints.clone().into();
    let output = pipeline
        .run(&table, &hints, &options)
        .await
        .with_context(|| format!("Failed to forecast {}", args.file.display()))?;

    let explanations = if args.explain {
        explain_all(&output.forecasts, &config).await?
    } else {
        BTreeMap::new()
    };

    let failures: Vec<FailureEntry> = output
        .failures
        .iter()
        .map(|e| FailureEntry {
            item_id: e.item_id().map(str::to_string),
            error: e.to_string(),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            print_json(&ForecastReport {
                source,
                items: &output.forecasts,
                failures,
                explanations,
            })?;
        }
        OutputFormat::Table => {
            for item in &output.forecasts {
                print_item(item, explanations.get(&item.item_id));
            }
            for failure in &failures {
                print_error(&failure.error);
            }
            if !output.forecasts.is_empty() {
                print_success(&format!("Forecast {} item(s) from {}", output.forecasts.len(), source));
            }
        }
    }

    if output.forecasts.is_empty() {
        anyhow::bail!("No item could be forecast");
    }
    Ok(())
}

async fn explain_all(items: &[ItemForecast], config: &AppConfig) -> Result<BTreeMap<String, String>> {
    let explainer: Box<dyn Explainer> = if config.explainer.is_remote() {
        Box::new(HttpExplainer::new(&config.explainer)?)
    } else {
        Box::new(TemplateExplainer)
    };

    let mut explanations = BTreeMap::new();
    for item in items {
        let request = ExplanationRequest::from_item(item, &config.explainer.domain);
        match explain_checked(explainer.as_ref(), &request).await {
            Ok(text) => {
                explanations.insert(item.item_id.clone(), text);
            }
            Err(e) => warn!(item_id = %item.item_id, error = %e, "No explanation for item"),
        }
    }
    Ok(explanations)
}

fn print_item(item: &ItemForecast, explanation: Option<&String>) {
    let included = item.run.included_models().count();
    print_info(&format!(
        "{}: {} of {} models in the ensemble, {:.0} units over {} days",
        item.item_id,
        included,
        item.run.models.len(),
        item.run.total_quantity(),
        item.run.forecasts.len()
    ));

    let models: Vec<ModelRow> = item
        .run
        .models
        .iter()
        .map(|m| match &m.status {
            ModelStatus::Included { backtest_error, weight } => ModelRow {
                model: m.model_name.clone(),
                status: color_status("included"),
                backtest_error: color_error(*backtest_error),
                weight: format_weight(*weight),
                reason: String::new(),
            },
            ModelStatus::Excluded { reason } => ModelRow {
                model: m.model_name.clone(),
                status: color_status("excluded"),
                backtest_error: "-".to_string(),
                weight: "-".to_string(),
                reason: reason.clone(),
            },
        })
        .collect();
    println!("{}", render_table(models));

    let days: Vec<ForecastRow> = item
        .run
        .forecasts
        .iter()
        .map(|f| ForecastRow {
            day: f.horizon_day,
            date: f.date.to_string(),
            forecast: format_quantity(f.blended_quantity),
            low: format_quantity(f.confidence_low),
            high: format_quantity(f.confidence_high),
        })
        .collect();
    println!("{}", render_table(days));

    let metrics: Vec<MetricRow> = item
        .evaluation
        .metrics()
        .iter()
        .map(|(name, value)| MetricRow {
            name: name.clone(),
            value: format_metric(*value),
        })
        .collect();
    println!("{}", render_table(metrics));

    let report = &item.report;
    if !report.outliers.is_empty() || !report.imputed_dates.is_empty() {
        print_warning(&format!(
            "{} outlier(s) repaired, {} day(s) imputed",
            report.outliers.len(),
            report.imputed_dates.len()
        ));
    }
    if let Some(text) = explanation {
        println!("\n{}\n", text);
    }
}
