//! Ensemble combiner
//!
//! Runs every adapter concurrently on its own blocking task, weights the
//! survivors by inverse backtest error and blends their predictions into
//! one forecast with a cross-model disagreement band.

mod blend;

#[cfg(test)]
mod tests;

pub use blend::{blend_day, inverse_error_weights, BlendedDay, DEFAULT_BAND_MULTIPLIER, DEFAULT_EPSILON};

use crate::adapters::{default_adapters, AdapterConfig, ModelAdapter};
use crate::error::{AdapterError, AdapterFailure, EnsembleError};
use crate::models::{
    EnsembleForecast, EnsembleRun, ModelForecast, ModelReport, ModelStatus, SalesSeries,
};
use crate::observability::{EngineMetrics, StructuredLogger};
use chrono::{Duration as DateDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default number of trailing days held out for backtesting
pub const DEFAULT_HOLDOUT_DAYS: usize = 7;

pub const DEFAULT_HORIZON: usize = 7;

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub holdout_days: usize,
    pub epsilon: f64,
    pub band_multiplier: f64,
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            holdout_days: DEFAULT_HOLDOUT_DAYS,
            epsilon: DEFAULT_EPSILON,
            band_multiplier: DEFAULT_BAND_MULTIPLIER,
            seed: DEFAULT_SEED,
        }
    }
}

impl EnsembleConfig {
    /// Reject settings that would break the weighting: weights must stay
    /// non-negative and proportional to `1 / (error + epsilon)`
    pub fn validate(&self) -> Result<(), EnsembleError> {
        if self.holdout_days == 0 {
            return Err(EnsembleError::InvalidHoldout);
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(EnsembleError::InvalidConfig(format!(
                "epsilon must be positive and finite, got {}",
                self.epsilon
            )));
        }
        if !(self.band_multiplier.is_finite() && self.band_multiplier >= 0.0) {
            return Err(EnsembleError::InvalidConfig(format!(
                "band_multiplier must be non-negative and finite, got {}",
                self.band_multiplier
            )));
        }
        Ok(())
    }
}

/// What one adapter contributed before weighting
#[derive(Debug, Clone)]
struct AdapterOutcome {
    backtest_error: f64,
    predictions: Vec<f64>,
}

fn run_adapter(
    adapter: &dyn ModelAdapter,
    series: &SalesSeries,
    holdout_days: usize,
    horizon: usize,
    seed: u64,
) -> Result<AdapterOutcome, AdapterError> {
    let errors = adapter.backtest(series, holdout_days, seed)?;
    let backtest_error = errors.iter().sum::<f64>() / errors.len().max(1) as f64;
    if !backtest_error.is_finite() {
        return Err(AdapterError::training(adapter.name(), "backtest error is not finite"));
    }

    let predictions: Vec<f64> = adapter
        .fit(series, seed)?
        .predict(horizon)
        .into_iter()
        .map(|(_, value)| value)
        .collect();
    if predictions.len() != horizon || predictions.iter().any(|v| !v.is_finite()) {
        return Err(AdapterError::training(
            adapter.name(),
            format!("expected {horizon} finite predictions"),
        ));
    }

    Ok(AdapterOutcome {
        backtest_error,
        predictions,
    })
}

/// Blends a fixed set of adapters; weights are recomputed on every call
pub struct EnsembleCombiner {
    adapters: Vec<Arc<dyn ModelAdapter>>,
    config: EnsembleConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl EnsembleCombiner {
    /// Fails on an invalid config or when two adapters share a name, since
    /// weights are keyed by adapter name
    pub fn new(adapters: Vec<Arc<dyn ModelAdapter>>, config: EnsembleConfig) -> Result<Self, EnsembleError> {
        config.validate()?;
        let mut seen = BTreeSet::new();
        for adapter in &adapters {
            if !seen.insert(adapter.name()) {
                return Err(EnsembleError::DuplicateAdapter(adapter.name().to_string()));
            }
        }

        Ok(Self {
            adapters,
            config,
            metrics: EngineMetrics::new(),
            logger: StructuredLogger::default(),
        })
    }

    /// Combiner over the four built-in model families
    pub fn with_default_adapters(
        adapter_config: &AdapterConfig,
        config: EnsembleConfig,
    ) -> Result<Self, EnsembleError> {
        Self::new(default_adapters(adapter_config), config)
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Forecast `horizon` days past the end of `series`
    pub async fn combine(&self, series: &SalesSeries, horizon: usize) -> Result<EnsembleRun, EnsembleError> {
        if horizon == 0 {
            return Err(EnsembleError::InvalidHorizon);
        }

        self.logger
            .log_run_started(series.item_id(), series.len(), self.adapters.len(), horizon);

        let shared = Arc::new(series.clone());
        let handles: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| {
                let name = adapter.name().to_string();
                let adapter = Arc::clone(adapter);
                let series = Arc::clone(&shared);
                let (holdout, seed) = (self.config.holdout_days, self.config.seed);
                let handle = tokio::task::spawn_blocking(move || {
                    let start = Instant::now();
                    let outcome = run_adapter(adapter.as_ref(), &series, holdout, horizon, seed);
                    (outcome, start.elapsed())
                });
                (name, handle)
            })
            .collect();

        // Every handle is awaited; one failure never cancels the others
        let mut survivors: Vec<(String, AdapterOutcome)> = Vec::new();
        let mut failures: Vec<AdapterFailure> = Vec::new();
        for (name, handle) in handles {
            let reason = match handle.await {
                Ok((Ok(outcome), elapsed)) => {
                    self.metrics
                        .observe_adapter_latency(&name, elapsed.as_secs_f64());
                    self.metrics.observe_backtest_error(&name, outcome.backtest_error);
                    debug!(
                        model = %name,
                        backtest_error = outcome.backtest_error,
                        duration_ms = elapsed.as_millis() as u64,
                        "Adapter finished"
                    );
                    survivors.push((name, outcome));
                    continue;
                }
                Ok((Err(e), _)) => e.to_string(),
                Err(e) => format!("adapter task failed: {e}"),
            };
            self.metrics.inc_adapter_exclusions(&name);
            self.logger
                .log_adapter_excluded(series.item_id(), &name, &reason);
            failures.push(AdapterFailure {
                model: name,
                reason,
            });
        }

        let last_day = match series.end_date() {
            Some(day) if !survivors.is_empty() => day,
            _ => {
                self.metrics.inc_forecast_failures();
                warn!(item_id = %series.item_id(), "No adapter produced a forecast");
                return Err(EnsembleError::Unavailable { failures });
            }
        };

        let run = self.assemble(series, last_day, horizon, &survivors, failures);
        self.metrics.inc_forecast_runs();
        self.logger.log_forecast_generated(
            series.item_id(),
            horizon,
            survivors.len(),
            run.total_quantity(),
        );
        Ok(run)
    }

    /// [`combine`](Self::combine) bounded by a caller-supplied timeout
    pub async fn combine_with_timeout(
        &self,
        series: &SalesSeries,
        horizon: usize,
        timeout: Duration,
    ) -> Result<EnsembleRun, EnsembleError> {
        match tokio::time::timeout(timeout, self.combine(series, horizon)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(item_id = %series.item_id(), timeout_ms = timeout.as_millis() as u64, "Ensemble run timed out");
                Err(EnsembleError::Timeout(timeout))
            }
        }
    }

    fn assemble(
        &self,
        series: &SalesSeries,
        last_day: NaiveDate,
        horizon: usize,
        survivors: &[(String, AdapterOutcome)],
        failures: Vec<AdapterFailure>,
    ) -> EnsembleRun {
        let errors: Vec<f64> = survivors.iter().map(|(_, o)| o.backtest_error).collect();
        let weights = inverse_error_weights(&errors, self.config.epsilon);
        let weight_map: BTreeMap<String, f64> = survivors
            .iter()
            .zip(&weights)
            .map(|((name, _), w)| (name.clone(), *w))
            .collect();

        let forecasts = (0..horizon)
            .map(|i| {
                let predictions: Vec<f64> = survivors.iter().map(|(_, o)| o.predictions[i]).collect();
                let day = blend_day(&predictions, &weights, self.config.band_multiplier);
                EnsembleForecast {
                    horizon_day: (i + 1) as u32,
                    date: last_day + DateDuration::days(i as i64 + 1),
                    blended_quantity: day.blended,
                    confidence_low: day.low,
                    confidence_high: day.high,
                    contributing_weights: weight_map.clone(),
                }
            })
            .collect();

        let model_forecasts = survivors
            .iter()
            .flat_map(|(name, outcome)| {
                outcome
                    .predictions
                    .iter()
                    .enumerate()
                    .map(move |(i, value)| ModelForecast {
                        model_name: name.clone(),
                        horizon_day: (i + 1) as u32,
                        predicted_quantity: *value,
                        backtest_error: outcome.backtest_error,
                    })
            })
            .collect();

        // Reports follow adapter registration order
        let models = self
            .adapters
            .iter()
            .map(|adapter| {
                let name = adapter.name();
                let status = match survivors.iter().position(|(n, _)| n == name) {
                    Some(idx) => ModelStatus::Included {
                        backtest_error: survivors[idx].1.backtest_error,
                        weight: weights[idx],
                    },
                    None => ModelStatus::Excluded {
                        reason: failures
                            .iter()
                            .find(|f| f.model == name)
                            .map(|f| f.reason.clone())
                            .unwrap_or_default(),
                    },
                };
                ModelReport {
                    model_name: name.to_string(),
                    status,
                }
            })
            .collect();

        EnsembleRun {
            item_id: series.item_id().to_string(),
            forecasts,
            model_forecasts,
            models,
        }
    }
}
