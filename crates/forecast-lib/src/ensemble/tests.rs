//! Ensemble scenarios with built-in and stub adapters

#[cfg(test)]
mod combiner_tests {
    use crate::adapters::{AdapterConfig, ModelAdapter, TrainedModel, TrendConfig};
    use crate::ensemble::{EnsembleCombiner, EnsembleConfig};
    use crate::error::{AdapterError, EnsembleError};
    use crate::models::{ModelStatus, SalesSeries};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::time::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn series(days: usize) -> SalesSeries {
        let values: Vec<f64> = (0..days)
            .map(|t| 40.0 + [0.0, 3.0, 5.0, 4.0, 8.0, 14.0, 10.0][t % 7] + (t % 3) as f64)
            .collect();
        SalesSeries::from_quantities("bagels", start(), &values)
    }

    struct Constant(f64);

    impl TrainedModel for Constant {
        fn predict(&self, horizon: usize) -> Vec<(u32, f64)> {
            (1..=horizon).map(|d| (d as u32, self.0)).collect()
        }
    }

    /// Adapter with a fixed backtest error and a flat prediction
    struct StubAdapter {
        name: &'static str,
        error: f64,
        prediction: f64,
        delay: Option<Duration>,
        panics: bool,
    }

    impl StubAdapter {
        fn new(name: &'static str, error: f64, prediction: f64) -> Self {
            Self {
                name,
                error,
                prediction,
                delay: None,
                panics: false,
            }
        }
    }

    impl ModelAdapter for StubAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn min_history(&self) -> usize {
            1
        }

        fn fit(&self, _series: &SalesSeries, _seed: u64) -> Result<Box<dyn TrainedModel>, AdapterError> {
            if self.panics {
                panic!("stub adapter exploded");
            }
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            Ok(Box::new(Constant(self.prediction)))
        }

        fn backtest(&self, _series: &SalesSeries, holdout_days: usize, _seed: u64) -> Result<Vec<f64>, AdapterError> {
            Ok(vec![self.error; holdout_days])
        }
    }

    fn adapters(stubs: Vec<StubAdapter>) -> Vec<Arc<dyn ModelAdapter>> {
        stubs
            .into_iter()
            .map(|s| Arc::new(s) as Arc<dyn ModelAdapter>)
            .collect()
    }

    fn combiner(stubs: Vec<StubAdapter>) -> EnsembleCombiner {
        EnsembleCombiner::new(adapters(stubs), EnsembleConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_default_adapters_weights_sum_to_one() {
        let combiner = EnsembleCombiner::with_default_adapters(&AdapterConfig::default(), EnsembleConfig::default()).unwrap();
        let run = combiner.combine(&series(70), 7).await.unwrap();

        assert_eq!(run.forecasts.len(), 7);
        assert_eq!(run.included_models().count(), 4);
        for forecast in &run.forecasts {
            let total: f64 = forecast.contributing_weights.values().sum();
            assert!((total - 1.0).abs() <= 1e-9);
            assert!(forecast.confidence_low <= forecast.blended_quantity);
            assert!(forecast.blended_quantity <= forecast.confidence_high);
            assert!(forecast.confidence_low >= 0.0);
        }
        assert_eq!(run.forecasts[0].date, start() + chrono::Duration::days(70));
        assert_eq!(run.model_forecasts.len(), 4 * 7);
    }

    #[tokio::test]
    async fn test_all_adapters_failing_is_unavailable() {
        let combiner = EnsembleCombiner::with_default_adapters(&AdapterConfig::default(), EnsembleConfig::default()).unwrap();
        let err = combiner.combine(&series(4), 7).await.unwrap_err();

        match err {
            EnsembleError::Unavailable { failures } => {
                let names: Vec<&str> = failures.iter().map(|f| f.model.as_str()).collect();
                assert_eq!(
                    names,
                    vec![
                        "trend_decomposition",
                        "gradient_boosted_trees",
                        "sequence_model",
                        "histogram_boosted_trees"
                    ]
                );
                assert!(failures.iter().all(|f| f.reason.contains("history")));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ten_day_series_drops_only_the_trend_model() {
        let adapter_config = AdapterConfig {
            trend: TrendConfig { seasonal_period: 365 },
            ..Default::default()
        };
        let config = EnsembleConfig {
            holdout_days: 2,
            ..Default::default()
        };
        let combiner = EnsembleCombiner::with_default_adapters(&adapter_config, config).unwrap();

        let run = combiner.combine(&series(10), 7).await.unwrap();

        let trend = &run.models[0];
        assert_eq!(trend.model_name, "trend_decomposition");
        assert!(matches!(trend.status, ModelStatus::Excluded { .. }));
        assert_eq!(run.included_models().count(), 3);

        let weights = &run.forecasts[0].contributing_weights;
        assert_eq!(weights.len(), 3);
        assert!(!weights.contains_key("trend_decomposition"));
        assert!((weights.values().sum::<f64>() - 1.0).abs() <= 1e-9);
    }

    #[tokio::test]
    async fn test_five_vs_ten_percent_error_weights_two_to_one() {
        let combiner = combiner(vec![
            StubAdapter::new("sharp", 5.0, 100.0),
            StubAdapter::new("blunt", 10.0, 130.0),
        ]);
        let run = combiner.combine(&series(30), 3).await.unwrap();

        let weights = &run.forecasts[0].contributing_weights;
        assert_relative_eq!(weights["sharp"] / weights["blunt"], 2.0, epsilon = 1e-6);
        assert_relative_eq!(run.forecasts[0].blended_quantity, 110.0, epsilon = 1e-4);

        match &run.models[0].status {
            ModelStatus::Included { backtest_error, weight } => {
                assert_relative_eq!(*backtest_error, 5.0);
                assert_relative_eq!(*weight, 2.0 / 3.0, epsilon = 1e-6);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_band_widens_with_disagreement() {
        let mut previous_width = -1.0;
        for spread in [0.0, 1.0, 5.0, 20.0, 60.0] {
            let combiner = combiner(vec![
                StubAdapter::new("low", 8.0, 100.0 - spread),
                StubAdapter::new("high", 8.0, 100.0 + spread),
                StubAdapter::new("mid", 8.0, 100.0),
            ]);
            let run = combiner.combine(&series(30), 1).await.unwrap();
            let width = run.forecasts[0].band_width();
            assert!(width >= previous_width, "spread {spread} gave width {width}");
            previous_width = width;
        }
    }

    #[tokio::test]
    async fn test_panicking_adapter_is_excluded() {
        let mut broken = StubAdapter::new("broken", 1.0, 0.0);
        broken.panics = true;
        let combiner = combiner(vec![broken, StubAdapter::new("steady", 4.0, 12.0)]);

        let run = combiner.combine(&series(30), 2).await.unwrap();
        assert_eq!(run.forecasts[0].contributing_weights.len(), 1);
        assert_relative_eq!(run.forecasts[0].blended_quantity, 12.0);
        match &run.models[0].status {
            ModelStatus::Excluded { reason } => assert!(reason.contains("task failed")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let mut slow = StubAdapter::new("slow", 1.0, 1.0);
        slow.delay = Some(Duration::from_millis(500));
        let combiner = combiner(vec![slow]);

        let err = combiner
            .combine_with_timeout(&series(30), 1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, EnsembleError::Timeout(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_zero_horizon_is_rejected() {
        let combiner = combiner(vec![StubAdapter::new("a", 1.0, 1.0)]);
        assert_eq!(
            combiner.combine(&series(30), 0).await.unwrap_err(),
            EnsembleError::InvalidHorizon
        );
    }

    #[tokio::test]
    async fn test_reweighting_follows_latest_errors() {
        let first = combiner(vec![
            StubAdapter::new("a", 2.0, 10.0),
            StubAdapter::new("b", 8.0, 20.0),
        ]);
        let second = combiner(vec![
            StubAdapter::new("a", 8.0, 10.0),
            StubAdapter::new("b", 2.0, 20.0),
        ]);

        let w1 = first.combine(&series(30), 1).await.unwrap().forecasts[0].contributing_weights.clone();
        let w2 = second.combine(&series(30), 1).await.unwrap().forecasts[0].contributing_weights.clone();
        assert!(w1["a"] > w1["b"]);
        assert!(w2["a"] < w2["b"]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        for config in [
            EnsembleConfig { epsilon: 0.0, ..Default::default() },
            EnsembleConfig { epsilon: -1.5, ..Default::default() },
            EnsembleConfig { epsilon: f64::NAN, ..Default::default() },
            EnsembleConfig { band_multiplier: f64::INFINITY, ..Default::default() },
            EnsembleConfig { band_multiplier: -1.0, ..Default::default() },
        ] {
            let result = EnsembleCombiner::new(adapters(vec![StubAdapter::new("a", 1.0, 1.0)]), config.clone());
            assert!(
                matches!(result, Err(EnsembleError::InvalidConfig(_))),
                "accepted {config:?}"
            );
        }

        let zero_holdout = EnsembleConfig { holdout_days: 0, ..Default::default() };
        assert!(matches!(
            EnsembleCombiner::new(adapters(vec![StubAdapter::new("a", 1.0, 1.0)]), zero_holdout),
            Err(EnsembleError::InvalidHoldout)
        ));
    }

    #[tokio::test]
    async fn test_perfect_backtest_dominates() {
        let combiner = combiner(vec![
            StubAdapter::new("exact", 0.0, 10.0),
            StubAdapter::new("rough", 10.0, 50.0),
        ]);
        let run = combiner.combine(&series(30), 1).await.unwrap();
        let weights = &run.forecasts[0].contributing_weights;

        assert!(weights["exact"] > 0.999_999);
        assert!(weights.values().all(|w| *w >= 0.0));
        assert_relative_eq!(run.forecasts[0].blended_quantity, 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_duplicate_adapter_names_are_rejected() {
        let result = EnsembleCombiner::new(
            adapters(vec![StubAdapter::new("twin", 1.0, 1.0), StubAdapter::new("twin", 2.0, 2.0)]),
            EnsembleConfig::default(),
        );
        assert!(matches!(result, Err(EnsembleError::DuplicateAdapter(name)) if name == "twin"));
    }
}
