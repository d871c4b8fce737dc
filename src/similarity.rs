use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use rayon::prelude::*;
use tracing::debug;

use crate::{ForestParams, RandomForest, Result, StyleRankError};

/// Which side of the comparison a piece belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Label {
    Candidate,
    Reference,
}

impl Label {
    pub fn index(&self) -> usize {
        match self {
            Label::Candidate => 0,
            Label::Reference => 1,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Label::Candidate => "candidate",
            Label::Reference => "reference",
        }
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// Dense symmetric matrix of pairwise similarities.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityMatrix {
    n: usize,
    values: Vec<f64>,
}

impl SimilarityMatrix {
    fn zeros(n: usize) -> Self {
        SimilarityMatrix {n, values: vec![0.0; n * n]}
    }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.n + j] = value;
        self.values[j * self.n + i] = value;
    }

    pub fn len(&self) -> usize {self.n}

    pub fn is_empty(&self) -> bool {self.n == 0}

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n..(i + 1) * self.n]
    }
}

/// Cosine similarity of two binary vectors given as ascending active columns.
pub fn cosine_similarity(a: &[usize], b: &[usize]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (mut i, mut j, mut shared) = (0, 0, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            shared += 1;
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    shared as f64 / ((a.len() * b.len()) as f64).sqrt()
}

fn feature_seed(seed: u64, feature: usize) -> u64 {
    seed ^ (feature as u64 + 1).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
}

/// Trains one forest per feature to tell candidates from references and
/// averages the leaf co-occurrence similarities.
#[derive(Copy, Clone, Debug)]
pub struct SimilarityEngine {
    params: ForestParams,
}

impl SimilarityEngine {
    pub fn new(params: ForestParams) -> Self {
        SimilarityEngine {params}
    }

    pub fn params(&self) -> &ForestParams {&self.params}

    pub fn validate(features: &BTreeMap<String, Vec<Vec<f64>>>, labels: &[Label]) -> Result<()> {
        for class in [Label::Candidate, Label::Reference] {
            if !labels.contains(&class) {
                return Err(StyleRankError::EmptyClass {class: class.class_name().to_string()});
            }
        }
        if features.is_empty() {
            return Err(StyleRankError::NoFeatures);
        }
        for (name, rows) in features.iter() {
            if rows.len() != labels.len() {
                return Err(StyleRankError::malformed(name, format!("{} rows for {} pieces", rows.len(), labels.len())));
            }
            let width = rows[0].len();
            if let Some(i) = rows.iter().position(|row| row.len() != width) {
                return Err(StyleRankError::malformed(name, format!("row {} has {} columns, expected {}", i, rows[i].len(), width)));
            }
            if let Some(i) = rows.iter().position(|row| row.iter().any(|v| !v.is_finite())) {
                return Err(StyleRankError::malformed(name, format!("row {} holds a non-finite value", i)));
            }
        }
        Ok(())
    }

    pub fn feature_similarity(&self, feature: usize, rows: &[Vec<f64>], labels: &[Label]) -> SimilarityMatrix {
        let classes: Vec<usize> = labels.iter().map(|l| l.index()).collect();
        let params = ForestParams {seed: feature_seed(self.params.seed, feature), ..self.params};
        let forest = RandomForest::fit(rows, &classes, &params);
        let embedded: Vec<Vec<usize>> = rows.iter().map(|row| forest.embed(row)).collect();
        let mut matrix = SimilarityMatrix::zeros(rows.len());
        for i in 0..rows.len() {
            for j in i..rows.len() {
                matrix.set(i, j, cosine_similarity(&embedded[i], &embedded[j]));
            }
        }
        matrix
    }

    /// Mean of the per-feature matrices, summed in feature-name order.
    pub fn similarity(&self, features: &BTreeMap<String, Vec<Vec<f64>>>, labels: &[Label]) -> Result<SimilarityMatrix> {
        self.params.validate()?;
        Self::validate(features, labels)?;
        let entries: Vec<(&String, &Vec<Vec<f64>>)> = features.iter().collect();
        let per_feature: Vec<SimilarityMatrix> = entries
            .par_iter()
            .enumerate()
            .map(|(f, (name, rows))| {
                debug!(feature = name.as_str(), "training forest");
                self.feature_similarity(f, rows, labels)
            })
            .collect();
        let mut total = SimilarityMatrix::zeros(labels.len());
        for matrix in per_feature.iter() {
            for (sum, value) in total.values.iter_mut().zip(matrix.values.iter()) {
                *sum += value;
            }
        }
        let count = per_feature.len() as f64;
        for value in total.values.iter_mut() {
            *value /= count;
        }
        Ok(total)
    }
}
