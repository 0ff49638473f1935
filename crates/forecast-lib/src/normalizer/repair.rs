//! Gap filling and rolling outlier repair

use super::OutlierConfig;

/// Fill `None` slots by linear interpolation between the nearest known
/// neighbours; leading and trailing gaps take the nearest known value.
///
/// Returns `None` when the slice has no known value at all.
pub fn interpolate(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();
    let (&(first_idx, first_val), &(last_idx, last_val)) = (known.first()?, known.last()?);

    let mut filled = Vec::with_capacity(values.len());
    let mut next = 0usize;
    for (i, value) in values.iter().enumerate() {
        if let Some(v) = value {
            filled.push(*v);
            next += 1;
            continue;
        }
        if i < first_idx {
            filled.push(first_val);
        } else if i > last_idx {
            filled.push(last_val);
        } else {
            let (prev_idx, prev_val) = known[next - 1];
            let (next_idx, next_val) = known[next];
            let t = (i - prev_idx) as f64 / (next_idx - prev_idx) as f64;
            filled.push(prev_val + (next_val - prev_val) * t);
        }
    }
    Some(filled)
}

/// A value replaced by the rolling median
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Repair {
    pub index: usize,
    pub original: f64,
    pub replacement: f64,
}

/// Replace values that sit too far from their trailing-window median.
///
/// Windows are read from the already-repaired prefix, so repairing a
/// repaired series changes nothing.
pub fn repair_outliers(values: &mut [f64], config: &OutlierConfig) -> Vec<Repair> {
    let mut repairs = Vec::new();
    if !config.enabled || config.window == 0 {
        return repairs;
    }

    for i in config.window..values.len() {
        let mut window = values[i - config.window..i].to_vec();
        window.sort_by(f64::total_cmp);

        let median = quantile_sorted(&window, 0.5);
        let iqr = quantile_sorted(&window, 0.75) - quantile_sorted(&window, 0.25);
        let spread = iqr.max(config.min_relative_spread * median.abs());
        if spread <= f64::EPSILON {
            continue;
        }

        if (values[i] - median).abs() > config.multiplier * spread {
            repairs.push(Repair {
                index: i,
                original: values[i],
                replacement: median,
            });
            values[i] = median;
        }
    }
    repairs
}

/// Linear-interpolated quantile of an ascending slice
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = pos.floor() as usize;
            let upper = pos.ceil() as usize;
            let frac = pos - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_interpolate_interior_gap() {
        let filled = interpolate(&[Some(10.0), None, None, Some(40.0)]).unwrap();
        assert_eq!(filled, vec![10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_interpolate_boundaries() {
        let filled = interpolate(&[None, Some(5.0), None, Some(7.0), None]).unwrap();
        assert_eq!(filled, vec![5.0, 5.0, 6.0, 7.0, 7.0]);
    }

    #[test]
    fn test_interpolate_all_missing() {
        assert!(interpolate(&[None, None]).is_none());
        assert!(interpolate(&[]).is_none());
    }

    #[test]
    fn test_quantiles() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile_sorted(&sorted, 0.5), 2.5);
        assert_relative_eq!(quantile_sorted(&sorted, 0.25), 1.75);
        assert_relative_eq!(quantile_sorted(&sorted, 0.75), 3.25);
    }

    #[test]
    fn test_spike_in_flat_window_is_repaired() {
        let mut values = vec![10.0; 8];
        values.push(100.0);
        values.push(10.0);

        let repairs = repair_outliers(&mut values, &OutlierConfig::default());

        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].index, 8);
        assert_relative_eq!(repairs[0].original, 100.0);
        assert_relative_eq!(values[8], 10.0);
    }

    #[test]
    fn test_short_series_is_untouched() {
        let mut values = vec![1.0, 50.0, 1.0];
        assert!(repair_outliers(&mut values, &OutlierConfig::default()).is_empty());
        assert_eq!(values, vec![1.0, 50.0, 1.0]);
    }

    #[test]
    fn test_all_zero_window_does_not_flag() {
        let mut values = vec![0.0; 7];
        values.push(3.0);
        assert!(repair_outliers(&mut values, &OutlierConfig::default()).is_empty());
    }

    #[test]
    fn test_repair_is_stable() {
        let mut values: Vec<f64> = (0..30).map(|i| 20.0 + (i % 7) as f64).collect();
        values[15] = 400.0;
        values[22] = 0.0;

        let first = repair_outliers(&mut values, &OutlierConfig::default());
        assert!(!first.is_empty());

        let snapshot = values.clone();
        let second = repair_outliers(&mut values, &OutlierConfig::default());
        assert!(second.is_empty());
        assert_eq!(values, snapshot);
    }
}
