//! Isolation forest over a one-dimensional feature.
//!
//! Each tree recursively splits a random subsample at uniformly drawn
//! thresholds until points are isolated or a height limit is reached.  Points
//! that are isolated after fewer splits, averaged over all trees, score
//! closer to 1.

use rand::rngs::StdRng;
use rand::Rng;

/// Euler–Mascheroni constant, used in the harmonic-number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

// ── Tree ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Node {
    /// External node holding `size` training points.
    Leaf { size: usize },
    /// Values `< threshold` go left, the rest go right.
    Split {
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn build(sample: Vec<f64>, depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
        if depth >= height_limit || sample.len() <= 1 {
            return Node::Leaf { size: sample.len() };
        }

        let (min, max) = sample
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        // An infinite span cannot be sampled uniformly.
        if min >= max || !(max - min).is_finite() {
            return Node::Leaf { size: sample.len() };
        }

        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<f64>, Vec<f64>) = sample.into_iter().partition(|&v| v < threshold);

        Node::Split {
            threshold,
            left: Box::new(Node::build(left, depth + 1, height_limit, rng)),
            right: Box::new(Node::build(right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, x: f64, depth: usize) -> f64 {
        match self {
            Node::Leaf { size } => depth as f64 + average_path_length(*size),
            Node::Split {
                threshold,
                left,
                right,
            } => {
                if x < *threshold {
                    left.path_length(x, depth + 1)
                } else {
                    right.path_length(x, depth + 1)
                }
            }
        }
    }
}

/// Average path length of an unsuccessful binary-search-tree lookup among
/// `n` points; normalises path lengths across sample sizes.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

// ── IsolationForest ───────────────────────────────────────────────────────────

/// A fitted ensemble of isolation trees.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

impl IsolationForest {
    /// Fit `n_trees` trees, each on a subsample of at most `max_samples`
    /// values drawn without replacement from `values`.
    ///
    /// All randomness comes from `rng`, so a seeded generator makes the fit
    /// reproducible.
    pub fn fit(values: &[f64], n_trees: usize, max_samples: usize, rng: &mut StdRng) -> Self {
        let sample_size = max_samples.min(values.len());
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let sample: Vec<f64> =
                    rand::seq::index::sample(rng, values.len(), sample_size)
                        .into_iter()
                        .map(|i| values[i])
                        .collect();
                Node::build(sample, 0, height_limit, rng)
            })
            .collect();

        Self { trees, sample_size }
    }

    /// Anomaly score in `(0, 1]`: `2^(-E[h(x)] / c(n))`.
    ///
    /// Scores well above 0.5 indicate isolated points.
    pub fn score(&self, x: f64) -> f64 {
        let c = average_path_length(self.sample_size);
        if self.trees.is_empty() || c == 0.0 {
            return 0.5;
        }
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(x, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / c)
    }

    pub fn score_samples(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.score(v)).collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
