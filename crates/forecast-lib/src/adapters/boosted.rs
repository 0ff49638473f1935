//! Tree-boosting adapters
//!
//! Both adapters learn next-day demand from lag/rolling/weekday features and
//! forecast recursively, feeding each prediction back in as history.

use super::trees::{BoostedTrees, BoostingParams, ExactSplitter, HistogramSplitter, TreeParams};
use super::{
    check_finite, check_history, FeatureConfig, FeatureExtractor, ModelAdapter, SplitFinder,
    TrainedModel,
};
use crate::error::AdapterError;
use crate::models::SalesSeries;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub const GRADIENT_BOOSTED_TREES: &str = "gradient_boosted_trees";
pub const HISTOGRAM_BOOSTED_TREES: &str = "histogram_boosted_trees";

/// Minimum supervised rows a tree adapter trains on
const MIN_TRAINING_ROWS: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientBoostingConfig {
    pub features: FeatureConfig,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
}

impl Default for GradientBoostingConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 2,
            subsample: 0.8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramBoostingConfig {
    pub features: FeatureConfig,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub feature_fraction: f64,
}

impl Default for HistogramBoostingConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 4,
            min_samples_leaf: 2,
            max_bins: 32,
            feature_fraction: 0.9,
        }
    }
}

struct RecursiveTreeModel {
    trees: BoostedTrees,
    features: FeatureExtractor,
    history: Vec<f64>,
    next_date: NaiveDate,
}

impl TrainedModel for RecursiveTreeModel {
    fn predict(&self, horizon: usize) -> Vec<(u32, f64)> {
        let mut history = self.history.clone();
        let mut out = Vec::with_capacity(horizon);
        for day in 1..=horizon {
            let date = self.next_date + Duration::days(day as i64 - 1);
            let value = self.trees.predict(&self.features.row(&history, date)).max(0.0);
            history.push(value);
            out.push((day as u32, value));
        }
        out
    }
}

fn fit_recursive(
    name: &str,
    series: &SalesSeries,
    features: FeatureExtractor,
    params: &BoostingParams,
    splitter: impl FnOnce(&[Vec<f64>]) -> Box<dyn SplitFinder>,
    seed: u64,
) -> Result<Box<dyn TrainedModel>, AdapterError> {
    let (Some(start), Some(end)) = (series.start_date(), series.end_date()) else {
        return Err(AdapterError::insufficient(name, features.max_lag() + MIN_TRAINING_ROWS, 0));
    };
    let values = series.quantities();
    let (x, y) = features.training_set(&values, start);

    let mut rng = StdRng::seed_from_u64(seed);
    let splitter = splitter(&x);
    let trees = BoostedTrees::fit(&x, &y, params, splitter.as_ref(), &mut rng);

    let fitted: Vec<f64> = x.iter().map(|row| trees.predict(row)).collect();
    check_finite(name, &fitted)?;

    Ok(Box::new(RecursiveTreeModel {
        trees,
        features,
        history: values,
        next_date: end + Duration::days(1),
    }))
}

/// Boosted trees with exact greedy split search and seeded row subsampling
pub struct GradientBoostedTrees {
    config: GradientBoostingConfig,
    features: FeatureExtractor,
}

impl GradientBoostedTrees {
    pub fn new(config: GradientBoostingConfig) -> Self {
        let features = FeatureExtractor::new(&config.features);
        Self { config, features }
    }
}

impl ModelAdapter for GradientBoostedTrees {
    fn name(&self) -> &str {
        GRADIENT_BOOSTED_TREES
    }

    fn min_history(&self) -> usize {
        self.features.max_lag() + MIN_TRAINING_ROWS
    }

    fn fit(&self, series: &SalesSeries, seed: u64) -> Result<Box<dyn TrainedModel>, AdapterError> {
        check_history(self.name(), self.min_history(), series)?;
        let params = BoostingParams {
            n_estimators: self.config.n_estimators,
            learning_rate: self.config.learning_rate,
            tree: TreeParams {
                max_depth: self.config.max_depth,
                min_samples_leaf: self.config.min_samples_leaf,
            },
            row_subsample: self.config.subsample,
            feature_fraction: 1.0,
        };
        fit_recursive(
            self.name(),
            series,
            self.features.clone(),
            &params,
            |_| -> Box<dyn SplitFinder> { Box::new(ExactSplitter) },
            seed,
        )
    }
}

/// Boosted trees over quantile-binned features with seeded feature subsampling
pub struct HistogramBoostedTrees {
    config: HistogramBoostingConfig,
    features: FeatureExtractor,
}

impl HistogramBoostedTrees {
    pub fn new(config: HistogramBoostingConfig) -> Self {
        let features = FeatureExtractor::new(&config.features);
        Self { config, features }
    }
}

impl ModelAdapter for HistogramBoostedTrees {
    fn name(&self) -> &str {
        HISTOGRAM_BOOSTED_TREES
    }

    fn min_history(&self) -> usize {
        self.features.max_lag() + MIN_TRAINING_ROWS
    }

    fn fit(&self, series: &SalesSeries, seed: u64) -> Result<Box<dyn TrainedModel>, AdapterError> {
        check_history(self.name(), self.min_history(), series)?;
        let params = BoostingParams {
            n_estimators: self.config.n_estimators,
            learning_rate: self.config.learning_rate,
            tree: TreeParams {
                max_depth: self.config.max_depth,
                min_samples_leaf: self.config.min_samples_leaf,
            },
            row_subsample: 1.0,
            feature_fraction: self.config.feature_fraction,
        };
        let max_bins = self.config.max_bins;
        fit_recursive(
            self.name(),
            series,
            self.features.clone(),
            &params,
            |x| -> Box<dyn SplitFinder> { Box::new(HistogramSplitter::new(x, max_bins)) },
            seed,
        )
    }
}
