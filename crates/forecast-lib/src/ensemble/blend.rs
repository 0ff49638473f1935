//! Inverse-error weighting and per-day blending

/// Default floor added to every backtest error before inverting
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Default band half-width, in weighted standard deviations
pub const DEFAULT_BAND_MULTIPLIER: f64 = 1.96;

/// Weights proportional to `1 / (error + epsilon)`, normalized to sum to one.
/// `epsilon` must be positive; [`EnsembleConfig::validate`](super::EnsembleConfig::validate) enforces it.
pub fn inverse_error_weights(errors: &[f64], epsilon: f64) -> Vec<f64> {
    let raw: Vec<f64> = errors.iter().map(|e| 1.0 / (e.max(0.0) + epsilon)).collect();
    let total: f64 = raw.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        let n = errors.len().max(1) as f64;
        return vec![1.0 / n; errors.len()];
    }
    raw.iter().map(|w| w / total).collect()
}

/// Blended value and disagreement band for one horizon day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendedDay {
    pub blended: f64,
    pub low: f64,
    pub high: f64,
}

/// Weighted mean of `predictions`, with a band of `band_multiplier` weighted
/// standard deviations either side; the lower bound never goes below zero
pub fn blend_day(predictions: &[f64], weights: &[f64], band_multiplier: f64) -> BlendedDay {
    let blended: f64 = predictions.iter().zip(weights).map(|(p, w)| p * w).sum();
    let variance: f64 = predictions
        .iter()
        .zip(weights)
        .map(|(p, w)| w * (p - blended).powi(2))
        .sum();
    let half_width = band_multiplier.max(0.0) * variance.max(0.0).sqrt();

    BlendedDay {
        blended,
        low: (blended - half_width).max(0.0).min(blended),
        high: blended + half_width,
    }
}
