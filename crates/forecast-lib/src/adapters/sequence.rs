//! Sequence-model adapter
//!
//! A small Elman recurrent network (tanh hidden state, linear read-out)
//! over min-max scaled lookback windows, trained with backpropagation
//! through time.

use super::{check_finite, check_history, ModelAdapter, TrainedModel};
use crate::error::AdapterError;
use crate::models::SalesSeries;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const SEQUENCE_MODEL: &str = "sequence_model";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub lookback: usize,
    pub hidden_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    /// Per-element gradient clip
    pub gradient_clip: f64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            lookback: 7,
            hidden_size: 8,
            epochs: 150,
            learning_rate: 0.05,
            gradient_clip: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct Weights {
    w_in: Vec<f64>,
    w_rec: Vec<Vec<f64>>,
    b_hidden: Vec<f64>,
    w_out: Vec<f64>,
    b_out: f64,
}

impl Weights {
    fn random(hidden: usize, rng: &mut StdRng) -> Self {
        let scale = 1.0 / (hidden as f64).sqrt();
        let draw = |rng: &mut StdRng| rng.gen_range(-scale..scale);
        Self {
            w_in: (0..hidden).map(|_| draw(rng)).collect(),
            w_rec: (0..hidden)
                .map(|_| (0..hidden).map(|_| draw(rng)).collect())
                .collect(),
            b_hidden: vec![0.0; hidden],
            w_out: (0..hidden).map(|_| draw(rng)).collect(),
            b_out: 0.0,
        }
    }

    fn zeros_like(&self) -> Self {
        let hidden = self.w_in.len();
        Self {
            w_in: vec![0.0; hidden],
            w_rec: vec![vec![0.0; hidden]; hidden],
            b_hidden: vec![0.0; hidden],
            w_out: vec![0.0; hidden],
            b_out: 0.0,
        }
    }

    /// Hidden states for every step, `states[0]` being the zero initial state
    fn forward(&self, inputs: &[f64]) -> Vec<Vec<f64>> {
        let hidden = self.w_in.len();
        let mut states = Vec::with_capacity(inputs.len() + 1);
        states.push(vec![0.0; hidden]);
        for &x in inputs {
            let prev = &states[states.len() - 1];
            let next: Vec<f64> = (0..hidden)
                .map(|j| {
                    let recurrent: f64 = self.w_rec[j].iter().zip(prev).map(|(w, h)| w * h).sum();
                    (self.w_in[j] * x + recurrent + self.b_hidden[j]).tanh()
                })
                .collect();
            states.push(next);
        }
        states
    }

    fn output(&self, state: &[f64]) -> f64 {
        self.w_out.iter().zip(state).map(|(w, h)| w * h).sum::<f64>() + self.b_out
    }

    fn predict(&self, inputs: &[f64]) -> f64 {
        let states = self.forward(inputs);
        self.output(&states[states.len() - 1])
    }

    /// One SGD step on a single window; returns the squared error before the step
    fn train_step(&mut self, inputs: &[f64], target: f64, learning_rate: f64, clip: f64) -> f64 {
        let hidden = self.w_in.len();
        let states = self.forward(inputs);
        let last = &states[states.len() - 1];
        let error = self.output(last) - target;

        let mut grad = self.zeros_like();
        grad.b_out = error;
        for j in 0..hidden {
            grad.w_out[j] = error * last[j];
        }

        let mut d_state: Vec<f64> = self.w_out.iter().map(|w| w * error).collect();
        for step in (1..states.len()).rev() {
            let h = &states[step];
            let h_prev = &states[step - 1];
            let d_pre: Vec<f64> = (0..hidden).map(|j| d_state[j] * (1.0 - h[j] * h[j])).collect();

            for j in 0..hidden {
                grad.w_in[j] += d_pre[j] * inputs[step - 1];
                grad.b_hidden[j] += d_pre[j];
                for k in 0..hidden {
                    grad.w_rec[j][k] += d_pre[j] * h_prev[k];
                }
            }
            d_state = (0..hidden)
                .map(|k| (0..hidden).map(|j| self.w_rec[j][k] * d_pre[j]).sum())
                .collect();
        }

        let step = |w: &mut f64, g: f64| *w -= learning_rate * g.clamp(-clip, clip);
        step(&mut self.b_out, grad.b_out);
        for j in 0..hidden {
            step(&mut self.w_out[j], grad.w_out[j]);
            step(&mut self.w_in[j], grad.w_in[j]);
            step(&mut self.b_hidden[j], grad.b_hidden[j]);
            for k in 0..hidden {
                step(&mut self.w_rec[j][k], grad.w_rec[j][k]);
            }
        }
        error * error
    }

    fn is_finite(&self) -> bool {
        self.w_in
            .iter()
            .chain(&self.b_hidden)
            .chain(&self.w_out)
            .chain(self.w_rec.iter().flatten())
            .all(|v| v.is_finite())
            && self.b_out.is_finite()
    }
}

/// Min-max scaling to [0, 1]; constant series map to 0
#[derive(Debug, Clone, Copy)]
struct Scaler {
    min: f64,
    span: f64,
}

impl Scaler {
    fn fit(values: &[f64]) -> Self {
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = if max - min > f64::EPSILON { max - min } else { 1.0 };
        Self { min, span }
    }

    fn scale(&self, v: f64) -> f64 {
        (v - self.min) / self.span
    }

    fn unscale(&self, v: f64) -> f64 {
        v * self.span + self.min
    }
}

struct FittedSequence {
    weights: Weights,
    scaler: Scaler,
    lookback: usize,
    /// Last `lookback` scaled observations
    tail: Vec<f64>,
}

impl TrainedModel for FittedSequence {
    fn predict(&self, horizon: usize) -> Vec<(u32, f64)> {
        let mut window = self.tail.clone();
        let mut out = Vec::with_capacity(horizon);
        for day in 1..=horizon {
            let value = self.scaler.unscale(self.weights.predict(&window)).max(0.0);
            window.remove(0);
            window.push(self.scaler.scale(value));
            out.push((day as u32, value));
        }
        debug_assert_eq!(window.len(), self.lookback);
        out
    }
}

pub struct SequenceModel {
    config: SequenceConfig,
}

impl SequenceModel {
    pub fn new(config: SequenceConfig) -> Self {
        Self { config }
    }

    fn lookback(&self) -> usize {
        self.config.lookback.max(1)
    }
}

impl ModelAdapter for SequenceModel {
    fn name(&self) -> &str {
        SEQUENCE_MODEL
    }

    fn min_history(&self) -> usize {
        self.lookback() + 1
    }

    fn fit(&self, series: &SalesSeries, seed: u64) -> Result<Box<dyn TrainedModel>, AdapterError> {
        check_history(self.name(), self.min_history(), series)?;
        let lookback = self.lookback();
        let values = series.quantities();
        let scaler = Scaler::fit(&values);
        let scaled: Vec<f64> = values.iter().map(|v| scaler.scale(*v)).collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights = Weights::random(self.config.hidden_size.max(1), &mut rng);
        let mut order: Vec<usize> = (lookback..scaled.len()).collect();

        let mut last_loss = 0.0;
        for _ in 0..self.config.epochs {
            order.shuffle(&mut rng);
            last_loss = 0.0;
            for &t in &order {
                last_loss += weights.train_step(
                    &scaled[t - lookback..t],
                    scaled[t],
                    self.config.learning_rate,
                    self.config.gradient_clip,
                );
            }
            if !last_loss.is_finite() {
                break;
            }
        }

        if !weights.is_finite() {
            return Err(AdapterError::training(self.name(), "weights diverged"));
        }
        check_finite(self.name(), &[last_loss])?;

        Ok(Box::new(FittedSequence {
            weights,
            scaler,
            lookback,
            tail: scaled[scaled.len() - lookback..].to_vec(),
        }))
    }
}
