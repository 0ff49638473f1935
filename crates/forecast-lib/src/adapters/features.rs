//! Feature extraction for the tree-based adapters
//!
//! Each row describes the day being predicted using only values observed
//! before it: lagged quantities, trailing rolling mean and deviation, and
//! the weekday.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub rolling_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3],
            rolling_window: 7,
        }
    }
}

/// Builds feature rows from a value history
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    lags: Vec<usize>,
    rolling_window: usize,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        let mut lags: Vec<usize> = config.lags.iter().copied().filter(|l| *l > 0).collect();
        lags.sort_unstable();
        lags.dedup();
        if lags.is_empty() {
            lags.push(1);
        }
        Self {
            lags,
            rolling_window: config.rolling_window.max(1),
        }
    }

    pub fn max_lag(&self) -> usize {
        self.lags.last().copied().unwrap_or(1)
    }

    pub fn feature_count(&self) -> usize {
        self.lags.len() + 3
    }

    /// Features for the day right after `history`, falling on `date`.
    /// `history` must hold at least `max_lag()` values.
    pub fn row(&self, history: &[f64], date: NaiveDate) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.feature_count());
        for &lag in &self.lags {
            row.push(history[history.len() - lag]);
        }

        let window = &history[history.len().saturating_sub(self.rolling_window)..];
        let (mean, std) = mean_std(window);
        row.push(mean);
        row.push(std);
        row.push(date.weekday().num_days_from_monday() as f64);
        row
    }

    /// Supervised rows for every day that has a full lag history
    pub fn training_set(&self, values: &[f64], start: NaiveDate) -> (Vec<Vec<f64>>, Vec<f64>) {
        let first = self.max_lag();
        let mut x = Vec::with_capacity(values.len().saturating_sub(first));
        let mut y = Vec::with_capacity(values.len().saturating_sub(first));
        for t in first..values.len() {
            x.push(self.row(&values[..t], start + Duration::days(t as i64)));
            y.push(values[t]);
        }
        (x, y)
    }
}

/// Population mean and standard deviation
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Least-squares slope and intercept of `values` against their index
pub fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, values.first().copied().unwrap_or(0.0));
    }

    let sum_x: f64 = (0..values.len()).map(|i| i as f64).sum();
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(i, &y)| i as f64 * y).sum();
    let sum_x2: f64 = (0..values.len()).map(|i| (i as f64).powi(2)).sum();

    let denominator = n * sum_x2 - sum_x * sum_x;
    if denominator.abs() < f64::EPSILON {
        return (0.0, sum_y / n);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    (slope, intercept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_row_layout() {
        let extractor = FeatureExtractor::new(&FeatureConfig::default());
        let history = [1.0, 2.0, 3.0, 4.0];
        let row = extractor.row(&history, monday());

        assert_eq!(row.len(), extractor.feature_count());
        assert_eq!(&row[..3], &[4.0, 3.0, 2.0]);
        assert_relative_eq!(row[3], 2.5);
        assert_relative_eq!(row[4], 1.25f64.sqrt());
        assert_eq!(row[5], 0.0);
    }

    #[test]
    fn test_training_set_alignment() {
        let extractor = FeatureExtractor::new(&FeatureConfig {
            lags: vec![2, 1, 2, 0],
            rolling_window: 3,
        });
        assert_eq!(extractor.max_lag(), 2);

        let (x, y) = extractor.training_set(&[10.0, 20.0, 30.0, 40.0], monday());
        assert_eq!(y, vec![30.0, 40.0]);
        assert_eq!(&x[0][..2], &[20.0, 10.0]);
        // Day index 2 falls on Wednesday
        assert_eq!(x[0][4], 2.0);
    }

    #[test]
    fn test_linear_fit() {
        let (slope, intercept) = linear_fit(&[1.0, 3.0, 5.0, 7.0]);
        assert_relative_eq!(slope, 2.0);
        assert_relative_eq!(intercept, 1.0);

        let (slope, intercept) = linear_fit(&[4.0]);
        assert_eq!(slope, 0.0);
        assert_eq!(intercept, 4.0);
    }
}
