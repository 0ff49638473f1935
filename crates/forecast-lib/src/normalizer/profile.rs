//! Per-item demand profile: volatility summary and z-score anomaly log

use crate::models::{AnomalyFlag, AnomalyKind, VolatilityLevel, VolatilityProfile};
use chrono::NaiveDate;

/// Days with |z| above this are logged as spikes or drops
pub const DEFAULT_Z_SCORE_THRESHOLD: f64 = 2.5;

/// Trailing window for the rolling standard deviation
pub const VOLATILITY_WINDOW: usize = 7;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, `None` below two values
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

pub fn volatility_profile(values: &[f64], window: usize) -> VolatilityProfile {
    let m = mean(values);
    let cv = if m > 0.0 {
        let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
        variance.sqrt() / m
    } else {
        0.0
    };

    // Windows grow from the first day, like a rolling std with min_periods = 1
    let window = window.max(1);
    let rolling: Vec<f64> = (0..values.len())
        .filter_map(|i| sample_std(&values[(i + 1).saturating_sub(window)..=i]))
        .collect();

    VolatilityProfile {
        coefficient_of_variation: cv,
        level: VolatilityLevel::from_cv(cv),
        mean_rolling_std: mean(&rolling),
        max_rolling_std: rolling.iter().copied().fold(0.0, f64::max),
    }
}

/// Flag missing days and days whose z-score against the item's known values
/// exceeds `threshold` in either direction
pub fn detect_anomalies(dates: &[NaiveDate], raw: &[Option<f64>], threshold: f64) -> Vec<AnomalyFlag> {
    let known: Vec<f64> = raw.iter().flatten().copied().collect();
    let m = mean(&known);
    let std = sample_std(&known).unwrap_or(0.0);

    dates
        .iter()
        .zip(raw)
        .filter_map(|(&date, value)| {
            let Some(value) = *value else {
                return Some(AnomalyFlag {
                    date,
                    quantity: None,
                    kind: AnomalyKind::Missing,
                    z_score: None,
                });
            };
            if std < f64::EPSILON {
                return None;
            }
            let z = (value - m) / std;
            let kind = if z > threshold {
                AnomalyKind::Spike
            } else if z < -threshold {
                AnomalyKind::Drop
            } else {
                return None;
            };
            Some(AnomalyFlag {
                date,
                quantity: Some(value),
                kind,
                z_score: Some(z),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    #[test]
    fn test_flat_series_is_very_stable() {
        let profile = volatility_profile(&[20.0; 14], VOLATILITY_WINDOW);
        assert_eq!(profile.coefficient_of_variation, 0.0);
        assert_eq!(profile.level, VolatilityLevel::VeryStable);
        assert_eq!(profile.max_rolling_std, 0.0);
    }

    #[test]
    fn test_volatility_levels() {
        // mean 10, population std 5
        let profile = volatility_profile(&[5.0, 15.0, 5.0, 15.0], VOLATILITY_WINDOW);
        assert_relative_eq!(profile.coefficient_of_variation, 0.5);
        assert_eq!(profile.level, VolatilityLevel::Volatile);

        assert_eq!(volatility_profile(&[0.0, 0.0, 30.0], 7).level, VolatilityLevel::HighlyVolatile);
        assert_eq!(volatility_profile(&[9.0, 11.0, 9.0, 11.0], 7).level, VolatilityLevel::VeryStable);
        assert_eq!(VolatilityLevel::from_cv(0.3), VolatilityLevel::Stable);
    }

    #[test]
    fn test_rolling_std_uses_trailing_window() {
        let profile = volatility_profile(&[1.0, 3.0, 100.0, 100.0, 100.0], 2);
        // windows: [1,3] [3,100] [100,100] [100,100]
        let expected = [2f64.sqrt(), 97.0 / 2f64.sqrt(), 0.0, 0.0];
        assert_relative_eq!(profile.max_rolling_std, expected[1], epsilon = 1e-9);
        assert_relative_eq!(
            profile.mean_rolling_std,
            expected.iter().sum::<f64>() / 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_anomalies_are_classified() {
        let mut raw: Vec<Option<f64>> = vec![Some(50.0); 20];
        raw[3] = Some(52.0);
        raw[8] = Some(400.0);
        raw[12] = None;
        raw[15] = Some(48.0);
        raw[17] = Some(0.0);
        let days = dates(raw.len());

        let flags = detect_anomalies(&days, &raw, DEFAULT_Z_SCORE_THRESHOLD);
        let kinds: Vec<(NaiveDate, AnomalyKind)> = flags.iter().map(|f| (f.date, f.kind)).collect();
        assert_eq!(
            kinds,
            vec![(days[8], AnomalyKind::Spike), (days[12], AnomalyKind::Missing)]
        );
        assert!(flags[0].z_score.unwrap() > DEFAULT_Z_SCORE_THRESHOLD);
        assert_eq!(flags[1].quantity, None);

        let low: Vec<Option<f64>> = (0..20).map(|i| Some(if i == 5 { 0.0 } else { 100.0 + (i % 3) as f64 })).collect();
        let flags = detect_anomalies(&dates(20), &low, DEFAULT_Z_SCORE_THRESHOLD);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Drop);
        assert!(flags[0].z_score.unwrap() < -DEFAULT_Z_SCORE_THRESHOLD);
    }

    #[test]
    fn test_constant_series_has_no_z_anomalies() {
        let raw = vec![Some(7.0), Some(7.0), None, Some(7.0)];
        let flags = detect_anomalies(&dates(4), &raw, DEFAULT_Z_SCORE_THRESHOLD);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, AnomalyKind::Missing);
    }
}
