//! End-to-end forecast pipeline
//!
//! Normalizes an upload, then combines and evaluates every item. A failing
//! item is reported with its id and never blocks the others.

use crate::adapters::AdapterConfig;
use crate::ensemble::{EnsembleCombiner, EnsembleConfig, DEFAULT_HORIZON};
use crate::error::{PipelineError, ValidationError};
use crate::evaluator::{evaluate, evaluate_against_baseline};
use crate::models::{ColumnHints, EnsembleRun, EvaluationResult, NormalizationReport, RawTable, SalesSeries};
use crate::normalizer::{Normalizer, NormalizerConfig};
use crate::observability::StructuredLogger;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Smoothing factor of the exponential smoothing baseline
pub const DEFAULT_SES_ALPHA: f64 = 0.3;

/// Everything needed to build a pipeline; loadable from a config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub normalizer: NormalizerConfig,
    pub adapters: AdapterConfig,
    pub ensemble: EnsembleConfig,
    pub ses_alpha: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            adapters: AdapterConfig::default(),
            ensemble: EnsembleConfig::default(),
            ses_alpha: DEFAULT_SES_ALPHA,
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub horizon: usize,
    /// Only forecast this item
    pub item: Option<String>,
    /// Hold out the last `horizon` days as actuals and score against them
    pub evaluate_tail: bool,
    pub timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_HORIZON,
            item: None,
            evaluate_tail: false,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemForecast {
    pub item_id: String,
    pub run: EnsembleRun,
    pub evaluation: EvaluationResult,
    pub report: NormalizationReport,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    pub forecasts: Vec<ItemForecast>,
    pub failures: Vec<PipelineError>,
}

impl PipelineOutput {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Simple exponential smoothing: a flat forecast at the final smoothed level
pub fn ses_forecast(values: &[f64], alpha: f64, horizon: usize) -> Vec<f64> {
    let alpha = alpha.clamp(0.0, 1.0);
    let Some((&first, rest)) = values.split_first() else {
        return vec![0.0; horizon];
    };
    let level = rest
        .iter()
        .fold(first, |level, v| alpha * v + (1.0 - alpha) * level);
    vec![level; horizon]
}

pub struct ForecastPipeline {
    normalizer: Normalizer,
    combiner: EnsembleCombiner,
    ses_alpha: f64,
    logger: StructuredLogger,
}

impl ForecastPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let combiner = EnsembleCombiner::with_default_adapters(&config.adapters, config.ensemble)
            .map_err(PipelineError::Config)?;
        Ok(Self {
            normalizer: Normalizer::new(config.normalizer),
            combiner,
            ses_alpha: config.ses_alpha,
            logger: StructuredLogger::default(),
        })
    }

    /// Swap in a combiner built over a custom adapter set
    pub fn with_combiner(mut self, combiner: EnsembleCombiner) -> Self {
        self.combiner = combiner.with_logger(self.logger.clone());
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.combiner = self.combiner.with_logger(logger.clone());
        self.logger = logger;
        self
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub async fn run(
        &self,
        table: &RawTable,
        hints: &ColumnHints,
        options: &PipelineOptions,
    ) -> Result<PipelineOutput, PipelineError> {
        let mut series = self.normalizer.normalize(table, hints)?;
        if let Some(item) = &options.item {
            series.retain(|s| s.item_id() == item);
            if series.is_empty() {
                return Err(PipelineError::UnknownItem(item.clone()));
            }
        }

        let mut output = PipelineOutput::default();
        for s in &series {
            let report = s.report();
            self.logger
                .log_outliers_repaired(s.item_id(), report.outliers.len(), report.imputed_dates.len());

            match self.forecast_item(s, options).await {
                Ok(forecast) => output.forecasts.push(forecast),
                Err(e) => {
                    warn!(item_id = %s.item_id(), error = %e, "Item forecast failed");
                    output.failures.push(e);
                }
            }
        }

        info!(
            items = series.len(),
            forecasts = output.forecasts.len(),
            failures = output.failures.len(),
            "Pipeline run finished"
        );
        Ok(output)
    }

    async fn combine(&self, series: &SalesSeries, options: &PipelineOptions) -> Result<EnsembleRun, PipelineError> {
        let result = match options.timeout {
            Some(timeout) => {
                self.combiner
                    .combine_with_timeout(series, options.horizon, timeout)
                    .await
            }
            None => self.combiner.combine(series, options.horizon).await,
        };
        result.map_err(|source| PipelineError::Ensemble {
            item_id: series.item_id().to_string(),
            source,
        })
    }

    async fn forecast_item(&self, series: &SalesSeries, options: &PipelineOptions) -> Result<ItemForecast, PipelineError> {
        let item_id = series.item_id().to_string();
        let validation = |source: ValidationError| PipelineError::Validation {
            item_id: item_id.clone(),
            source,
        };

        let (run, evaluation) = if options.evaluate_tail {
            if series.len() <= options.horizon {
                return Err(PipelineError::TailTooShort {
                    item_id: series.item_id().to_string(),
                    available: series.len(),
                    horizon: options.horizon,
                });
            }
            let train = series.truncated(series.len() - options.horizon);
            let values = series.quantities();
            let actuals = &values[train.len()..];

            let run = self.combine(&train, options).await?;
            let baseline = ses_forecast(&train.quantities(), self.ses_alpha, options.horizon);
            let evaluation = evaluate_against_baseline(&run.forecasts, actuals, &baseline).map_err(validation)?;
            (run, evaluation)
        } else {
            let run = self.combine(series, options).await?;
            let evaluation = evaluate(&run.forecasts, None).map_err(validation)?;
            (run, evaluation)
        };

        Ok(ItemForecast {
            item_id,
            run,
            evaluation,
            report: series.report().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnsembleError;
    use crate::evaluator::{BASELINE_SES_MAPE, MAPE};
    use approx::assert_relative_eq;
    use chrono::{Duration as DateDuration, NaiveDate};

    fn upload(items: &[(&str, usize)]) -> RawTable {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut rows = Vec::new();
        for (item, days) in items {
            for t in 0..*days {
                let quantity = 20.0 + [0.0, 2.0, 4.0, 3.0, 6.0, 11.0, 8.0][t % 7] + (t % 4) as f64;
                rows.push(vec![
                    (start + DateDuration::days(t as i64)).format("%Y-%m-%d").to_string(),
                    item.to_string(),
                    quantity.to_string(),
                ]);
            }
        }
        RawTable::new(vec!["일자".into(), "품목".into(), "판매량".into()], rows)
    }

    #[test]
    fn test_ses_forecast() {
        assert_eq!(ses_forecast(&[10.0, 10.0, 10.0], 0.3, 2), vec![10.0, 10.0]);
        let level = ses_forecast(&[0.0, 10.0], 0.3, 1)[0];
        assert_relative_eq!(level, 3.0);
        assert_eq!(ses_forecast(&[], 0.3, 3), vec![0.0; 3]);
    }

    #[tokio::test]
    async fn test_pipeline_forecasts_every_item() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let table = upload(&[("croissant", 45), ("baguette", 45)]);

        let output = pipeline
            .run(&table, &ColumnHints::default(), &PipelineOptions::default())
            .await
            .unwrap();

        assert!(output.is_complete());
        let items: Vec<&str> = output.forecasts.iter().map(|f| f.item_id.as_str()).collect();
        assert_eq!(items, vec!["baguette", "croissant"]);
        for forecast in &output.forecasts {
            assert_eq!(forecast.run.forecasts.len(), 7);
            assert!(!forecast.evaluation.metric(MAPE).is_available());
            assert_eq!(forecast.report.mapping.quantity, "판매량");
        }
    }

    #[tokio::test]
    async fn test_evaluate_tail_reports_baseline() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let options = PipelineOptions {
            evaluate_tail: true,
            ..Default::default()
        };

        let output = pipeline
            .run(&upload(&[("croissant", 60)]), &ColumnHints::default(), &options)
            .await
            .unwrap();

        let forecast = &output.forecasts[0];
        assert_eq!(forecast.evaluation.daily().len(), 7);
        assert!(forecast.evaluation.metric(MAPE).is_available());
        assert!(forecast.evaluation.metric(BASELINE_SES_MAPE).is_available());
        // Fit on 53 days, so the first forecast day is day 54
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap() + DateDuration::days(53);
        assert_eq!(forecast.run.forecasts[0].date, expected);
    }

    #[tokio::test]
    async fn test_short_item_fails_alone() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let output = pipeline
            .run(
                &upload(&[("croissant", 45), ("macaron", 5)]),
                &ColumnHints::default(),
                &PipelineOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(output.forecasts.len(), 1);
        assert_eq!(output.forecasts[0].item_id, "croissant");
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].item_id(), Some("macaron"));
        assert!(matches!(
            output.failures[0],
            PipelineError::Ensemble {
                source: EnsembleError::Unavailable { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_tail_too_short() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let options = PipelineOptions {
            evaluate_tail: true,
            ..Default::default()
        };
        let output = pipeline
            .run(&upload(&[("macaron", 6)]), &ColumnHints::default(), &options)
            .await
            .unwrap();

        assert!(matches!(
            output.failures[0],
            PipelineError::TailTooShort { available: 6, horizon: 7, .. }
        ));
    }

    #[tokio::test]
    async fn test_item_filter() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let table = upload(&[("croissant", 30), ("baguette", 30)]);

        let options = PipelineOptions {
            item: Some("baguette".to_string()),
            horizon: 3,
            ..Default::default()
        };
        let output = pipeline.run(&table, &ColumnHints::default(), &options).await.unwrap();
        assert_eq!(output.forecasts.len(), 1);
        assert_eq!(output.forecasts[0].run.forecasts.len(), 3);

        let missing = PipelineOptions {
            item: Some("bagel".to_string()),
            ..Default::default()
        };
        assert_eq!(
            pipeline.run(&table, &ColumnHints::default(), &missing).await.unwrap_err(),
            PipelineError::UnknownItem("bagel".to_string())
        );
    }

    #[tokio::test]
    async fn test_schema_errors_are_fatal() {
        let pipeline = ForecastPipeline::new(PipelineConfig::default()).unwrap();
        let err = pipeline
            .run(&RawTable::default(), &ColumnHints::default(), &PipelineOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema(_)));
    }

    #[test]
    fn test_invalid_ensemble_config_is_rejected() {
        let mut config = PipelineConfig::default();
        config.ensemble.epsilon = 0.0;
        assert!(matches!(
            ForecastPipeline::new(config),
            Err(PipelineError::Config(EnsembleError::InvalidConfig(_)))
        ));
    }
}
