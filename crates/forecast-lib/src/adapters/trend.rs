//! Trend-decomposition adapter
//!
//! Linear trend plus an additive seasonal profile estimated from detrended
//! phase means.

use super::{check_finite, check_history, linear_fit, ModelAdapter, TrainedModel};
use crate::error::AdapterError;
use crate::models::SalesSeries;
use serde::{Deserialize, Serialize};

pub const TREND_DECOMPOSITION: &str = "trend_decomposition";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
    /// Seasonal period in days; two full cycles are required to fit
    pub seasonal_period: usize,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self { seasonal_period: 7 }
    }
}

pub struct TrendDecomposition {
    config: TrendConfig,
}

impl TrendDecomposition {
    pub fn new(config: TrendConfig) -> Self {
        Self { config }
    }

    fn period(&self) -> usize {
        self.config.seasonal_period.max(1)
    }
}

struct FittedTrend {
    slope: f64,
    intercept: f64,
    seasonal: Vec<f64>,
    observed: usize,
}

impl TrainedModel for FittedTrend {
    fn predict(&self, horizon: usize) -> Vec<(u32, f64)> {
        (1..=horizon)
            .map(|day| {
                let t = self.observed - 1 + day;
                let value = self.intercept + self.slope * t as f64 + self.seasonal[t % self.seasonal.len()];
                (day as u32, value.max(0.0))
            })
            .collect()
    }
}

impl ModelAdapter for TrendDecomposition {
    fn name(&self) -> &str {
        TREND_DECOMPOSITION
    }

    fn min_history(&self) -> usize {
        2 * self.period()
    }

    fn fit(&self, series: &SalesSeries, _seed: u64) -> Result<Box<dyn TrainedModel>, AdapterError> {
        check_history(self.name(), self.min_history(), series)?;
        let values = series.quantities();
        let period = self.period();

        let (slope, intercept) = linear_fit(&values);

        let mut sums = vec![0.0; period];
        let mut counts = vec![0usize; period];
        for (t, v) in values.iter().enumerate() {
            sums[t % period] += v - (intercept + slope * t as f64);
            counts[t % period] += 1;
        }
        let mut seasonal: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(s, c)| if *c == 0 { 0.0 } else { s / *c as f64 })
            .collect();
        let centre = seasonal.iter().sum::<f64>() / period as f64;
        seasonal.iter_mut().for_each(|s| *s -= centre);

        check_finite(self.name(), &[slope, intercept])?;
        check_finite(self.name(), &seasonal)?;

        Ok(Box::new(FittedTrend {
            slope,
            intercept,
            seasonal,
            observed: values.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn test_recovers_trend_and_weekly_profile() {
        let profile = [3.0, -1.0, 0.0, 2.0, -2.0, 1.0, -3.0];
        let values: Vec<f64> = (0..56).map(|t| 50.0 + 0.5 * t as f64 + profile[t % 7]).collect();
        let series = SalesSeries::from_quantities("x", start(), &values);

        let model = TrendDecomposition::new(TrendConfig::default()).fit(&series, 0).unwrap();
        let forecast = model.predict(7);

        assert_eq!(forecast.len(), 7);
        for (day, value) in forecast {
            let t = 55 + day as usize;
            let expected = 50.0 + 0.5 * t as f64 + profile[t % 7];
            assert_relative_eq!(value, expected, epsilon = 0.5);
        }
    }

    #[test]
    fn test_min_history_is_two_periods() {
        let adapter = TrendDecomposition::new(TrendConfig { seasonal_period: 365 });
        assert_eq!(adapter.min_history(), 730);

        let series = SalesSeries::from_quantities("x", start(), &[1.0; 10]);
        match adapter.fit(&series, 0) {
            Err(AdapterError::InsufficientHistory { required, available, .. }) => {
                assert_eq!(required, 730);
                assert_eq!(available, 10);
            }
            _ => panic!("expected insufficient history"),
        }
    }

    #[test]
    fn test_predictions_clamped_at_zero() {
        let values: Vec<f64> = (0..14).map(|t| (30.0 - 2.0 * t as f64).max(0.0)).collect();
        let series = SalesSeries::from_quantities("x", start(), &values);
        let model = TrendDecomposition::new(TrendConfig::default()).fit(&series, 0).unwrap();
        assert!(model.predict(30).iter().all(|(_, v)| *v >= 0.0));
    }
}
