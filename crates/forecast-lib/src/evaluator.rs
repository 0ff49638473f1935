//! Forecast evaluation
//!
//! Scores an ensemble forecast against actuals when they are known. Without
//! actuals every error metric is reported as unavailable rather than guessed.

use crate::adapters::absolute_percentage_error;
use crate::error::ValidationError;
use crate::models::{DailyMetrics, EnsembleForecast, EvaluationResult, MetricValue};
use std::collections::BTreeMap;
use tracing::debug;

pub const MAE: &str = "mae";
pub const MAPE: &str = "mape";
pub const RMSE: &str = "rmse";
pub const SMAPE: &str = "smape";
pub const ACCURACY_PCT: &str = "accuracy_pct";
pub const BAND_WIDTH_MEAN: &str = "band_width_mean";
pub const BASELINE_SES_MAPE: &str = "baseline_ses_mape";

/// Metrics that need actuals to be computed
pub const ERROR_METRICS: [&str; 5] = [MAE, MAPE, RMSE, SMAPE, ACCURACY_PCT];

const WEIGHT_TOLERANCE: f64 = 1e-6;
const BAND_TOLERANCE: f64 = 1e-9;

fn invalid(message: impl Into<String>) -> ValidationError {
    ValidationError(message.into())
}

fn validate_forecasts(forecasts: &[EnsembleForecast]) -> Result<(), ValidationError> {
    if forecasts.is_empty() {
        return Err(invalid("forecast is empty"));
    }

    for (i, f) in forecasts.iter().enumerate() {
        let expected = (i + 1) as u32;
        if f.horizon_day != expected {
            return Err(invalid(format!(
                "horizon days must run 1..{} in order, found {} at position {}",
                forecasts.len(),
                f.horizon_day,
                i
            )));
        }

        let values = [f.blended_quantity, f.confidence_low, f.confidence_high];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(invalid(format!("day {expected} has a non-finite value")));
        }
        if f.confidence_low > f.blended_quantity + BAND_TOLERANCE
            || f.blended_quantity > f.confidence_high + BAND_TOLERANCE
        {
            return Err(invalid(format!(
                "day {expected}: band [{}, {}] does not contain {}",
                f.confidence_low, f.confidence_high, f.blended_quantity
            )));
        }

        if f.contributing_weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid(format!("day {expected} has a negative or non-finite weight")));
        }
        let total: f64 = f.contributing_weights.values().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(invalid(format!("day {expected}: weights sum to {total}, expected 1")));
        }
    }
    Ok(())
}

fn validate_actuals(actuals: &[f64], horizon: usize) -> Result<(), ValidationError> {
    if actuals.len() != horizon {
        return Err(invalid(format!(
            "{} actuals for a {horizon}-day forecast",
            actuals.len()
        )));
    }
    if let Some(pos) = actuals.iter().position(|a| !a.is_finite() || *a < 0.0) {
        return Err(invalid(format!(
            "actual for day {} is negative or non-finite",
            pos + 1
        )));
    }
    Ok(())
}

fn symmetric_percentage_error(actual: f64, predicted: f64) -> f64 {
    let denominator = actual.abs() + predicted.abs();
    if denominator == 0.0 {
        0.0
    } else {
        200.0 * (actual - predicted).abs() / denominator
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Score `forecasts` against `actuals` (one per horizon day) when known
pub fn evaluate(
    forecasts: &[EnsembleForecast],
    actuals: Option<&[f64]>,
) -> Result<EvaluationResult, ValidationError> {
    validate_forecasts(forecasts)?;

    let mut metrics = BTreeMap::new();
    metrics.insert(
        BAND_WIDTH_MEAN.to_string(),
        MetricValue::Available(mean(forecasts.iter().map(EnsembleForecast::band_width))),
    );

    let Some(actuals) = actuals else {
        for name in ERROR_METRICS {
            metrics.insert(name.to_string(), MetricValue::Unavailable);
        }
        return Ok(EvaluationResult::new(metrics, Vec::new(), forecasts.to_vec()));
    };
    validate_actuals(actuals, forecasts.len())?;

    let daily: Vec<DailyMetrics> = forecasts
        .iter()
        .zip(actuals)
        .map(|(f, &actual)| DailyMetrics {
            horizon_day: f.horizon_day,
            actual,
            predicted: f.blended_quantity,
            absolute_error: (actual - f.blended_quantity).abs(),
            ape: absolute_percentage_error(actual, f.blended_quantity),
        })
        .collect();

    let mae = mean(daily.iter().map(|d| d.absolute_error));
    let mape = mean(daily.iter().map(|d| d.ape));
    let rmse = mean(daily.iter().map(|d| d.absolute_error.powi(2))).sqrt();
    let smape = mean(
        daily
            .iter()
            .map(|d| symmetric_percentage_error(d.actual, d.predicted)),
    );

    metrics.insert(MAE.to_string(), MetricValue::Available(mae));
    metrics.insert(MAPE.to_string(), MetricValue::Available(mape));
    metrics.insert(RMSE.to_string(), MetricValue::Available(rmse));
    metrics.insert(SMAPE.to_string(), MetricValue::Available(smape));
    metrics.insert(
        ACCURACY_PCT.to_string(),
        MetricValue::Available((100.0 - mape).max(0.0)),
    );

    debug!(days = daily.len(), mae = mae, mape = mape, "Evaluated forecast");
    Ok(EvaluationResult::new(metrics, daily, forecasts.to_vec()))
}

/// [`evaluate`], plus the MAPE of a baseline's predictions over the same days
pub fn evaluate_against_baseline(
    forecasts: &[EnsembleForecast],
    actuals: &[f64],
    baseline: &[f64],
) -> Result<EvaluationResult, ValidationError> {
    let result = evaluate(forecasts, Some(actuals))?;
    if baseline.len() != actuals.len() || baseline.iter().any(|v| !v.is_finite()) {
        return Err(invalid(format!(
            "baseline must hold {} finite predictions",
            actuals.len()
        )));
    }

    let baseline_mape = mean(
        actuals
            .iter()
            .zip(baseline)
            .map(|(a, p)| absolute_percentage_error(*a, *p)),
    );
    let mut metrics = result.metrics().clone();
    metrics.insert(
        BASELINE_SES_MAPE.to_string(),
        MetricValue::Available(baseline_mape),
    );
    Ok(EvaluationResult::new(
        metrics,
        result.daily().to_vec(),
        result.forecasts().to_vec(),
    ))
}
