//! Regression trees and squared-loss boosting
//!
//! Shared by both tree adapters. They differ only in how candidate splits
//! are enumerated: every distinct value (`ExactSplitter`) or quantile bin
//! boundaries (`HistogramSplitter`).

use rand::seq::index::sample;
use rand::rngs::StdRng;

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary tree; rows with `x[feature] <= threshold` go left
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match &nodes[index] {
                Node::Leaf(_) => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitCandidate {
    pub threshold: f64,
    /// Reduction in squared error
    pub gain: f64,
}

/// Finds the best threshold for one feature over a subset of rows
pub trait SplitFinder {
    fn best_split(
        &self,
        x: &[Vec<f64>],
        targets: &[f64],
        rows: &[usize],
        feature: usize,
        min_samples_leaf: usize,
    ) -> Option<SplitCandidate>;
}

fn split_gain(left_sum: f64, left_n: usize, total_sum: f64, total_n: usize) -> f64 {
    let right_sum = total_sum - left_sum;
    let right_n = total_n - left_n;
    left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64
        - total_sum * total_sum / total_n as f64
}

/// Scans every boundary between distinct sorted values
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactSplitter;

impl SplitFinder for ExactSplitter {
    fn best_split(
        &self,
        x: &[Vec<f64>],
        targets: &[f64],
        rows: &[usize],
        feature: usize,
        min_samples_leaf: usize,
    ) -> Option<SplitCandidate> {
        let mut sorted: Vec<(f64, f64)> = rows.iter().map(|&r| (x[r][feature], targets[r])).collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

        let total_sum: f64 = sorted.iter().map(|(_, t)| t).sum();
        let n = sorted.len();
        let mut left_sum = 0.0;
        let mut best: Option<SplitCandidate> = None;

        for i in 0..n.saturating_sub(1) {
            left_sum += sorted[i].1;
            let left_n = i + 1;
            if left_n < min_samples_leaf || n - left_n < min_samples_leaf {
                continue;
            }
            if sorted[i].0 == sorted[i + 1].0 {
                continue;
            }
            let gain = split_gain(left_sum, left_n, total_sum, n);
            if best.map_or(true, |b| gain > b.gain) {
                best = Some(SplitCandidate {
                    threshold: (sorted[i].0 + sorted[i + 1].0) / 2.0,
                    gain,
                });
            }
        }
        best
    }
}

/// Pre-binned feature matrix; split search runs over per-bin sums
#[derive(Debug, Clone)]
pub struct HistogramSplitter {
    /// Per feature, ascending cut points; bin b holds values in (cut[b-1], cut[b]]
    cuts: Vec<Vec<f64>>,
    /// Per row, per feature bin index
    bins: Vec<Vec<u16>>,
}

impl HistogramSplitter {
    pub fn new(x: &[Vec<f64>], max_bins: usize) -> Self {
        let feature_count = x.first().map_or(0, Vec::len);
        let max_bins = max_bins.clamp(2, u16::MAX as usize);

        let cuts: Vec<Vec<f64>> = (0..feature_count)
            .map(|f| {
                let mut values: Vec<f64> = x.iter().map(|row| row[f]).collect();
                values.sort_by(f64::total_cmp);
                values.dedup();
                bin_cuts(&values, max_bins)
            })
            .collect();

        let bins = x
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&cuts)
                    .map(|(v, c)| bin_index(c, *v))
                    .collect()
            })
            .collect();

        Self { cuts, bins }
    }

    pub fn bin_count(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }
}

/// Cut points over distinct ascending values; at most `max_bins - 1` cuts
fn bin_cuts(distinct: &[f64], max_bins: usize) -> Vec<f64> {
    if distinct.len() <= max_bins {
        return distinct[..distinct.len().saturating_sub(1)].to_vec();
    }
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|j| distinct[j * distinct.len() / max_bins - 1])
        .collect();
    cuts.dedup();
    cuts
}

fn bin_index(cuts: &[f64], value: f64) -> u16 {
    cuts.partition_point(|c| *c < value) as u16
}

impl SplitFinder for HistogramSplitter {
    fn best_split(
        &self,
        _x: &[Vec<f64>],
        targets: &[f64],
        rows: &[usize],
        feature: usize,
        min_samples_leaf: usize,
    ) -> Option<SplitCandidate> {
        let bin_count = self.bin_count(feature);
        let mut sums = vec![0.0; bin_count];
        let mut counts = vec![0usize; bin_count];
        for &r in rows {
            let b = self.bins[r][feature] as usize;
            sums[b] += targets[r];
            counts[b] += 1;
        }

        let total_sum: f64 = sums.iter().sum();
        let n = rows.len();
        let (mut left_sum, mut left_n) = (0.0, 0usize);
        let mut best: Option<SplitCandidate> = None;

        // The last bin has no upper cut, so it can never be a left side on its own
        for b in 0..bin_count - 1 {
            left_sum += sums[b];
            left_n += counts[b];
            if counts[b] == 0 || left_n < min_samples_leaf || n - left_n < min_samples_leaf {
                continue;
            }
            let gain = split_gain(left_sum, left_n, total_sum, n);
            if best.map_or(true, |c| gain > c.gain) {
                best = Some(SplitCandidate {
                    threshold: self.cuts[feature][b],
                    gain,
                });
            }
        }
        best
    }
}

fn mean_of(targets: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64
}

/// Grow a tree greedily on `rows`, considering only `features`
pub fn grow_tree(
    x: &[Vec<f64>],
    targets: &[f64],
    rows: &[usize],
    features: &[usize],
    params: TreeParams,
    splitter: &dyn SplitFinder,
) -> RegressionTree {
    let mut nodes = Vec::new();
    grow_node(&mut nodes, x, targets, rows.to_vec(), features, params, splitter, 0);
    RegressionTree { nodes }
}

#[allow(clippy::too_many_arguments)]
fn grow_node(
    nodes: &mut Vec<Node>,
    x: &[Vec<f64>],
    targets: &[f64],
    rows: Vec<usize>,
    features: &[usize],
    params: TreeParams,
    splitter: &dyn SplitFinder,
    depth: usize,
) -> usize {
    let index = nodes.len();
    nodes.push(Node::Leaf(mean_of(targets, &rows)));

    if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf.max(1) {
        return index;
    }

    let best = features
        .iter()
        .filter_map(|&f| {
            splitter
                .best_split(x, targets, &rows, f, params.min_samples_leaf.max(1))
                .map(|s| (f, s))
        })
        .max_by(|a, b| a.1.gain.total_cmp(&b.1.gain));

    let Some((feature, split)) = best else {
        return index;
    };
    if split.gain <= f64::EPSILON {
        return index;
    }

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| x[r][feature] <= split.threshold);
    if left_rows.is_empty() || right_rows.is_empty() {
        return index;
    }

    let left = grow_node(nodes, x, targets, left_rows, features, params, splitter, depth + 1);
    let right = grow_node(nodes, x, targets, right_rows, features, params, splitter, depth + 1);
    nodes[index] = Node::Split {
        feature,
        threshold: split.threshold,
        left,
        right,
    };
    index
}

#[derive(Debug, Clone, Copy)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    /// Fraction of rows drawn (without replacement) for each tree
    pub row_subsample: f64,
    /// Fraction of features considered by each tree
    pub feature_fraction: f64,
}

/// Additive model: base value plus shrunken tree corrections
#[derive(Debug, Clone)]
pub struct BoostedTrees {
    base: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl BoostedTrees {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: &BoostingParams,
        splitter: &dyn SplitFinder,
        rng: &mut StdRng,
    ) -> Self {
        let n = y.len();
        let base = if n == 0 { 0.0 } else { y.iter().sum::<f64>() / n as f64 };
        let feature_count = x.first().map_or(0, Vec::len);
        let mut predictions = vec![base; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        let rows_per_tree = fraction_of(n, params.row_subsample);
        let features_per_tree = fraction_of(feature_count, params.feature_fraction);

        for _ in 0..params.n_estimators {
            if n == 0 || feature_count == 0 {
                break;
            }
            let residuals: Vec<f64> = y.iter().zip(&predictions).map(|(t, p)| t - p).collect();

            let mut rows = sample(rng, n, rows_per_tree).into_vec();
            rows.sort_unstable();
            let mut features = sample(rng, feature_count, features_per_tree).into_vec();
            features.sort_unstable();

            let tree = grow_tree(x, &residuals, &rows, &features, params.tree, splitter);
            for (p, row) in predictions.iter_mut().zip(x) {
                *p += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Self {
            base,
            learning_rate: params.learning_rate,
            trees,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.base
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

fn fraction_of(total: usize, fraction: f64) -> usize {
    ((total as f64 * fraction.clamp(0.0, 1.0)).ceil() as usize).clamp(total.min(1), total)
}
