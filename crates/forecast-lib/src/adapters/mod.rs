//! Forecasting model adapters
//!
//! Every model family sits behind [`ModelAdapter`], so the ensemble never
//! needs to know which family it is talking to. Adding a family means
//! implementing the trait and listing it in [`default_adapters`].

mod boosted;
mod features;
mod sequence;
mod trees;
mod trend;


pub use boosted::{GradientBoostedTrees, GradientBoostingConfig, HistogramBoostedTrees, HistogramBoostingConfig};
pub use features::{linear_fit, mean_std, FeatureConfig, FeatureExtractor};
pub use sequence::{SequenceConfig, SequenceModel};
pub use trees::{
    BoostedTrees, BoostingParams, ExactSplitter, HistogramSplitter, RegressionTree, SplitFinder,
    TreeParams,
};
pub use trend::{TrendConfig, TrendDecomposition};

use crate::error::AdapterError;
use crate::models::SalesSeries;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A fitted model ready to forecast past the end of its training series
pub trait TrainedModel: Send {
    /// Predictions for days `1..=horizon` after the last training day, in order
    fn predict(&self, horizon: usize) -> Vec<(u32, f64)>;
}

/// Absolute percentage error, denominator floored at one unit
pub fn absolute_percentage_error(actual: f64, predicted: f64) -> f64 {
    (actual - predicted).abs() / actual.abs().max(1.0) * 100.0
}

/// Uniform contract for one forecasting family
pub trait ModelAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Days of history `fit` needs
    fn min_history(&self) -> usize;

    /// Fit on the whole series; identical inputs and seed give identical models
    fn fit(&self, series: &SalesSeries, seed: u64) -> Result<Box<dyn TrainedModel>, AdapterError>;

    /// Refit without the last `holdout_days` and score predictions over them.
    ///
    /// Returns one absolute percentage error per held-out day.
    fn backtest(&self, series: &SalesSeries, holdout_days: usize, seed: u64) -> Result<Vec<f64>, AdapterError> {
        let available = series.len();
        let required = self.min_history() + holdout_days;
        if holdout_days == 0 || available < required {
            return Err(AdapterError::insufficient(self.name(), required, available));
        }

        let cutoff = available - holdout_days;
        let model = self.fit(&series.truncated(cutoff), seed)?;
        let predictions = model.predict(holdout_days);
        if predictions.len() != holdout_days {
            return Err(AdapterError::training(
                self.name(),
                format!("expected {holdout_days} backtest predictions, got {}", predictions.len()),
            ));
        }

        Ok(series.records()[cutoff..]
            .iter()
            .zip(&predictions)
            .map(|(actual, (_, predicted))| absolute_percentage_error(actual.quantity, *predicted))
            .collect())
    }
}

pub(crate) fn check_history(name: &str, required: usize, series: &SalesSeries) -> Result<(), AdapterError> {
    if series.len() < required {
        return Err(AdapterError::insufficient(name, required, series.len()));
    }
    Ok(())
}

pub(crate) fn check_finite(name: &str, values: &[f64]) -> Result<(), AdapterError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(AdapterError::training(name, "model produced non-finite values"))
    }
}

/// Per-family settings for the default adapter set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub trend: TrendConfig,
    pub gradient_boosting: GradientBoostingConfig,
    pub sequence: SequenceConfig,
    pub histogram_boosting: HistogramBoostingConfig,
}

/// The four built-in families in a fixed order
pub fn default_adapters(config: &AdapterConfig) -> Vec<Arc<dyn ModelAdapter>> {
    vec![
        Arc::new(TrendDecomposition::new(config.trend.clone())),
        Arc::new(GradientBoostedTrees::new(config.gradient_boosting.clone())),
        Arc::new(SequenceModel::new(config.sequence.clone())),
        Arc::new(HistogramBoostedTrees::new(config.histogram_boosting.clone())),
    ]
}
