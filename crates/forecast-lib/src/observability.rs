//! Observability for the forecast engine
//!
//! Provides:
//! - Prometheus metrics (adapter fit latency, backtest error, exclusions, runs)
//! - Structured logging of run events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for adapter latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Backtest MAPE buckets, in percent
const ERROR_BUCKETS: &[f64] = &[1.0, 2.5, 5.0, 10.0, 15.0, 20.0, 30.0, 50.0, 100.0];

/// Global metrics instance; `None` when registration failed
static GLOBAL_METRICS: OnceLock<Option<EngineMetricsInner>> = OnceLock::new();

struct EngineMetricsInner {
    adapter_latency_seconds: HistogramVec,
    backtest_error_percent: HistogramVec,
    adapter_exclusions: IntCounterVec,
    forecast_runs: IntCounter,
    forecast_failures: IntCounter,
}

impl EngineMetricsInner {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            adapter_latency_seconds: register_histogram_vec!(
                "demandcast_adapter_latency_seconds",
                "Time spent backtesting, fitting and predicting with one adapter",
                &["model"],
                LATENCY_BUCKETS.to_vec()
            )?,
            backtest_error_percent: register_histogram_vec!(
                "demandcast_backtest_error_percent",
                "Mean absolute percentage error over the backtest holdout",
                &["model"],
                ERROR_BUCKETS.to_vec()
            )?,
            adapter_exclusions: register_int_counter_vec!(
                "demandcast_adapter_exclusions_total",
                "Adapters excluded from an ensemble run",
                &["model"]
            )?,
            forecast_runs: register_int_counter!(
                "demandcast_forecast_runs_total",
                "Ensemble runs that produced a forecast"
            )?,
            forecast_failures: register_int_counter!(
                "demandcast_forecast_failures_total",
                "Ensemble runs where no adapter produced a forecast"
            )?,
        })
    }
}

/// Engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(|| match EngineMetricsInner::new() {
            Ok(inner) => Some(inner),
            Err(e) => {
                warn!(error = %e, "Failed to register forecast metrics, continuing without them");
                None
            }
        });
        Self { _private: () }
    }

    fn inner(&self) -> Option<&EngineMetricsInner> {
        GLOBAL_METRICS.get().and_then(Option::as_ref)
    }

    pub fn observe_adapter_latency(&self, model: &str, duration_secs: f64) {
        if let Some(m) = self.inner() {
            m.adapter_latency_seconds
                .with_label_values(&[model])
                .observe(duration_secs);
        }
    }

    pub fn observe_backtest_error(&self, model: &str, mape: f64) {
        if let Some(m) = self.inner() {
            m.backtest_error_percent.with_label_values(&[model]).observe(mape);
        }
    }

    pub fn inc_adapter_exclusions(&self, model: &str) {
        if let Some(m) = self.inner() {
            m.adapter_exclusions.with_label_values(&[model]).inc();
        }
    }

    pub fn inc_forecast_runs(&self) {
        if let Some(m) = self.inner() {
            m.forecast_runs.inc();
        }
    }

    pub fn inc_forecast_failures(&self) {
        if let Some(m) = self.inner() {
            m.forecast_failures.inc();
        }
    }

    /// Render the default registry in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Structured logger for forecast events
///
/// Every event carries the `source` label of the run (usually the upload's file name).
#[derive(Clone)]
pub struct StructuredLogger {
    source: String,
}

impl StructuredLogger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn log_run_started(&self, item_id: &str, days: usize, adapters: usize, horizon: usize) {
        info!(
            event = "run_started",
            source = %self.source,
            item_id = %item_id,
            days = days,
            adapters = adapters,
            horizon = horizon,
            "Starting ensemble run"
        );
    }

    pub fn log_adapter_excluded(&self, item_id: &str, model: &str, reason: &str) {
        warn!(
            event = "adapter_excluded",
            source = %self.source,
            item_id = %item_id,
            model = %model,
            reason = %reason,
            "Model excluded from ensemble"
        );
    }

    pub fn log_forecast_generated(&self, item_id: &str, horizon: usize, models_used: usize, total_quantity: f64) {
        info!(
            event = "forecast_generated",
            source = %self.source,
            item_id = %item_id,
            horizon = horizon,
            models_used = models_used,
            total_quantity = total_quantity,
            "Generated ensemble forecast"
        );
    }

    pub fn log_outliers_repaired(&self, item_id: &str, outliers: usize, imputed_days: usize) {
        if outliers == 0 && imputed_days == 0 {
            return;
        }
        info!(
            event = "outliers_repaired",
            source = %self.source,
            item_id = %item_id,
            outliers = outliers,
            imputed_days = imputed_days,
            "Cleaned input series"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("demandcast")
    }
}
