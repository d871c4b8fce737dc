use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::ForestParams;

pub const NUM_CLASSES: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Node {
    Leaf {leaf: usize},
    Split {feature: usize, threshold: f64, left: usize, right: usize},
}

/// A training sample: row index and its weight (class weight times the
/// number of times the bootstrap drew it).
#[derive(Copy, Clone, Debug)]
struct Sample {
    row: usize,
    weight: f64,
}

fn entropy(class_weights: &[f64; NUM_CLASSES]) -> f64 {
    let total: f64 = class_weights.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    class_weights
        .iter()
        .filter(|w| **w > 0.0)
        .map(|w| {
            let p = w / total;
            -p * p.log2()
        })
        .sum()
}

fn class_totals(samples: &[Sample], labels: &[usize]) -> [f64; NUM_CLASSES] {
    let mut totals = [0.0; NUM_CLASSES];
    for s in samples {
        totals[labels[s.row]] += s.weight;
    }
    totals
}

#[derive(Copy, Clone, Debug)]
struct SplitChoice {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Binary classification tree grown greedily on entropy.
#[derive(Clone, Debug)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    n_leaves: usize,
}

struct TreeBuilder<'a, R: Rng> {
    rows: &'a [Vec<f64>],
    labels: &'a [usize],
    max_depth: usize,
    max_features: usize,
    rng: &'a mut R,
    nodes: Vec<Node>,
    n_leaves: usize,
}

impl <'a, R: Rng> TreeBuilder<'a, R> {
    fn leaf(&mut self) -> usize {
        self.nodes.push(Node::Leaf {leaf: self.n_leaves});
        self.n_leaves += 1;
        self.nodes.len() - 1
    }

    fn grow(&mut self, samples: Vec<Sample>, depth: usize) -> usize {
        let totals = class_totals(&samples, self.labels);
        if depth >= self.max_depth || samples.len() < 2 || totals.iter().any(|w| *w <= 0.0) {
            return self.leaf();
        }
        match self.best_split(&samples, entropy(&totals)) {
            None => self.leaf(),
            Some(choice) => {
                let id = self.nodes.len();
                self.nodes.push(Node::Leaf {leaf: usize::MAX});
                let (left, right): (Vec<Sample>, Vec<Sample>) = samples
                    .into_iter()
                    .partition(|s| self.rows[s.row][choice.feature] <= choice.threshold);
                let left = self.grow(left, depth + 1);
                let right = self.grow(right, depth + 1);
                self.nodes[id] = Node::Split {feature: choice.feature, threshold: choice.threshold, left, right};
                id
            }
        }
    }

    /// Visits features in random order until `max_features` non-constant ones
    /// have been scored.
    fn best_split(&mut self, samples: &[Sample], parent_entropy: f64) -> Option<SplitChoice> {
        let n_features = self.rows[samples[0].row].len();
        let mut order: Vec<usize> = (0..n_features).collect();
        order.shuffle(&mut *self.rng);
        let mut best: Option<SplitChoice> = None;
        let mut scored = 0;
        for feature in order {
            if scored >= self.max_features {
                break;
            }
            if let Some(choice) = self.best_threshold(samples, feature, parent_entropy) {
                scored += 1;
                if best.map_or(true, |b| choice.gain > b.gain) {
                    best = Some(choice);
                }
            }
        }
        best
    }

    fn best_threshold(&self, samples: &[Sample], feature: usize, parent_entropy: f64) -> Option<SplitChoice> {
        let mut sorted: Vec<(f64, usize, f64)> = samples
            .iter()
            .map(|s| (self.rows[s.row][feature], self.labels[s.row], s.weight))
            .collect();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        if sorted[0].0 == sorted[sorted.len() - 1].0 {
            return None;
        }
        let total = class_totals(samples, self.labels);
        let total_weight: f64 = total.iter().sum();
        let mut left = [0.0; NUM_CLASSES];
        let mut best: Option<SplitChoice> = None;
        for i in 0..sorted.len() - 1 {
            let (value, label, weight) = sorted[i];
            left[label] += weight;
            let next = sorted[i + 1].0;
            if value == next {
                continue;
            }
            let right = [total[0] - left[0], total[1] - left[1]];
            let left_weight: f64 = left.iter().sum();
            let right_weight = total_weight - left_weight;
            let children = (left_weight * entropy(&left) + right_weight * entropy(&right)) / total_weight;
            let gain = parent_entropy - children;
            if best.map_or(true, |b| gain > b.gain) {
                let midpoint = value + (next - value) / 2.0;
                let threshold = if midpoint < next {midpoint} else {value};
                best = Some(SplitChoice {feature, threshold, gain});
            }
        }
        best
    }
}

impl DecisionTree {
    fn fit<R: Rng>(rows: &[Vec<f64>], labels: &[usize], samples: Vec<Sample>, max_depth: usize, max_features: usize, rng: &mut R) -> Self {
        let mut builder = TreeBuilder {rows, labels, max_depth, max_features, rng, nodes: vec![], n_leaves: 0};
        if samples.is_empty() {
            builder.leaf();
        } else {
            builder.grow(samples, 0);
        }
        DecisionTree {nodes: builder.nodes, n_leaves: builder.n_leaves}
    }

    pub fn n_leaves(&self) -> usize {self.n_leaves}

    /// Index in `0..n_leaves()` of the leaf `row` lands in.
    pub fn apply(&self, row: &[f64]) -> usize {
        let mut node = 0;
        loop {
            match self.nodes[node] {
                Node::Leaf {leaf} => return leaf,
                Node::Split {feature, threshold, left, right} => {
                    node = if row[feature] <= threshold {left} else {right};
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn below(nodes: &[Node], node: usize) -> usize {
            match nodes[node] {
                Node::Leaf {..} => 0,
                Node::Split {left, right, ..} => 1 + below(nodes, left).max(below(nodes, right)),
            }
        }
        below(&self.nodes, 0)
    }
}

/// Weights each class by `n / (classes * n_class)` so both classes carry the
/// same total weight.
pub fn balanced_class_weights(labels: &[usize]) -> [f64; NUM_CLASSES] {
    let mut counts = [0usize; NUM_CLASSES];
    for label in labels {
        counts[*label] += 1;
    }
    let mut weights = [0.0; NUM_CLASSES];
    for (class, count) in counts.iter().enumerate() {
        if *count > 0 {
            weights[class] = labels.len() as f64 / (NUM_CLASSES * count) as f64;
        }
    }
    weights
}

fn tree_seed(seed: u64, tree: usize) -> u64 {
    seed ^ (tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Bagged entropy trees over two classes.
#[derive(Clone, Debug)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// `labels` holds class indices below `NUM_CLASSES`, one per row.
    pub fn fit(rows: &[Vec<f64>], labels: &[usize], params: &ForestParams) -> Self {
        let n = rows.len();
        let n_features = rows.first().map_or(0, |r| r.len());
        let max_features = ((n_features as f64).sqrt() as usize).max(1);
        let class_weights = balanced_class_weights(labels);
        let trees = (0..params.n_estimators)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(tree_seed(params.seed, t));
                let mut draws = vec![0usize; n];
                for _ in 0..n {
                    draws[rng.gen_range(0..n)] += 1;
                }
                let samples = draws
                    .iter()
                    .enumerate()
                    .filter(|(_, k)| **k > 0)
                    .map(|(row, k)| Sample {row, weight: class_weights[labels[row]] * *k as f64})
                    .collect();
                DecisionTree::fit(rows, labels, samples, params.max_depth, max_features, &mut rng)
            })
            .collect();
        RandomForest {trees}
    }

    pub fn trees(&self) -> &[DecisionTree] {&self.trees}

    pub fn len(&self) -> usize {self.trees.len()}

    pub fn is_empty(&self) -> bool {self.trees.is_empty()}

    /// Leaf reached in each tree.
    pub fn apply(&self, row: &[f64]) -> Vec<usize> {
        self.trees.iter().map(|t| t.apply(row)).collect()
    }

    /// Active columns of the one-hot leaf encoding, one per tree, ascending.
    pub fn embed(&self, row: &[f64]) -> Vec<usize> {
        let mut offset = 0;
        self.trees
            .iter()
            .map(|tree| {
                let column = offset + tree.apply(row);
                offset += tree.n_leaves();
                column
            })
            .collect()
    }
}
