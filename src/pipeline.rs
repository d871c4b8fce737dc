use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::{
    ExtractionParams, FeatureRegistry, Piece, PieceSource, Result, Symbol, FEATURE_REGISTRY,
    PITCH_CLASS_TABLE,
};

pub const REMAIN_COLUMN: &str = "remain";

/// Counts over a feature's domain, in domain order, followed by the overflow
/// bucket. The counts sum to the number of observed events.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeatureDistribution {
    counts: Vec<u64>,
}

impl FeatureDistribution {
    fn tally(symbols: &[Symbol], positions: &BTreeMap<Symbol, usize>) -> Self {
        let mut counts = vec![0; positions.len() + 1];
        for symbol in symbols {
            counts[positions.get(symbol).copied().unwrap_or(positions.len())] += 1;
        }
        FeatureDistribution {counts}
    }

    pub fn counts(&self) -> &[u64] {&self.counts}

    pub fn len(&self) -> usize {self.counts.len()}

    pub fn is_empty(&self) -> bool {self.counts.is_empty()}

    pub fn remain(&self) -> u64 {self.counts[self.counts.len() - 1]}

    pub fn total(&self) -> u64 {self.counts.iter().sum()}

    pub fn to_row(&self) -> Vec<f64> {
        self.counts.iter().map(|c| *c as f64).collect()
    }
}

/// One feature's histograms for every surviving piece, sharing one domain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FeatureMatrix {
    domain: Vec<Symbol>,
    rows: Vec<FeatureDistribution>,
}

impl FeatureMatrix {
    pub fn domain(&self) -> &[Symbol] {&self.domain}

    pub fn rows(&self) -> &[FeatureDistribution] {&self.rows}

    pub fn n_columns(&self) -> usize {self.domain.len() + 1}

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.to_row()).collect()
    }
}

/// Output of `get_features`: per-feature matrices row-aligned to the pieces
/// that could be read, plus where those pieces sat in the input.
#[derive(Clone, Debug)]
pub struct FeatureSet {
    ids: Vec<String>,
    surviving_indices: Vec<usize>,
    matrices: BTreeMap<String, FeatureMatrix>,
}

impl FeatureSet {
    pub fn ids(&self) -> &[String] {&self.ids}

    pub fn surviving_indices(&self) -> &[usize] {&self.surviving_indices}

    pub fn len(&self) -> usize {self.ids.len()}

    pub fn is_empty(&self) -> bool {self.ids.is_empty()}

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.matrices.keys().map(|name| name.as_str())
    }

    pub fn matrix(&self, feature: &str) -> Option<&FeatureMatrix> {
        self.matrices.get(feature)
    }

    pub fn distributions(&self) -> BTreeMap<String, Vec<Vec<f64>>> {
        self.matrices
            .iter()
            .map(|(name, matrix)| (name.clone(), matrix.to_rows()))
            .collect()
    }

    pub fn domains(&self) -> BTreeMap<String, Vec<Symbol>> {
        self.matrices
            .iter()
            .map(|(name, matrix)| (name.clone(), matrix.domain.clone()))
            .collect()
    }

    /// Writes `<feature>.csv` into `dir` for every feature.
    pub fn write_csv<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        std::fs::create_dir_all(dir.as_ref())?;
        for (name, matrix) in self.matrices.iter() {
            let mut out = BufWriter::new(File::create(dir.as_ref().join(format!("{}.csv", name)))?);
            let header: Vec<String> = std::iter::once("filepath".to_string())
                .chain(matrix.domain.iter().map(|s| s.to_string()))
                .chain(std::iter::once(REMAIN_COLUMN.to_string()))
                .collect();
            writeln!(out, "{}", header.join(","))?;
            for (id, row) in self.ids.iter().zip(matrix.rows.iter()) {
                let counts: Vec<String> = row.counts.iter().map(|c| c.to_string()).collect();
                writeln!(out, "{},{}", csv_field(id), counts.join(","))?;
            }
            out.flush()?;
        }
        Ok(())
    }
}

fn csv_field(text: &str) -> String {
    if text.contains(|c: char| matches!(c, ',' | '"' | '\n')) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Most widespread symbols first: by how many pieces show them, then by total
/// occurrences, then by value. Keeps `upper_bound - 1` of them.
fn build_domain<'a, I: Iterator<Item = &'a Vec<Symbol>>>(observations: I, upper_bound: usize) -> Vec<Symbol> {
    let mut stats: BTreeMap<Symbol, (usize, usize)> = BTreeMap::new();
    for symbols in observations {
        let mut seen = BTreeSet::new();
        for symbol in symbols {
            let entry = stats.entry(*symbol).or_default();
            entry.1 += 1;
            if seen.insert(*symbol) {
                entry.0 += 1;
            }
        }
    }
    let mut ranked: Vec<(Symbol, (usize, usize))> = stats.into_iter().collect();
    ranked.sort_by_key(|(symbol, (pieces, total))| (Reverse(*pieces), Reverse(*total), *symbol));
    ranked
        .into_iter()
        .take(upper_bound.saturating_sub(1))
        .map(|(symbol, _)| symbol)
        .collect()
}

fn extract_piece<S: PieceSource>(
    source: &S,
    features: &[String],
    registry: &FeatureRegistry,
    params: &ExtractionParams,
) -> Result<Vec<Vec<Symbol>>> {
    let piece = Piece::new(&source.id(), &source.load()?, params)?;
    Ok(features
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|feature| feature.extract(&piece, &PITCH_CLASS_TABLE))
        .collect())
}

/// Extracts every requested feature from every piece using the built-in
/// registry.
pub fn get_features<S: PieceSource>(pieces: &[S], feature_names: &[String], params: &ExtractionParams) -> Result<FeatureSet> {
    get_features_with(&FEATURE_REGISTRY, pieces, feature_names, params)
}

/// Pieces that fail with a recoverable error are logged and left out; any
/// other error aborts the batch.
pub fn get_features_with<S: PieceSource>(
    registry: &FeatureRegistry,
    pieces: &[S],
    feature_names: &[String],
    params: &ExtractionParams,
) -> Result<FeatureSet> {
    params.validate()?;
    let features = registry.resolve(feature_names)?;
    let extracted: Vec<Result<Vec<Vec<Symbol>>>> = pieces
        .par_iter()
        .map(|source| extract_piece(source, &features, registry, params))
        .collect();

    let mut ids = vec![];
    let mut surviving_indices = vec![];
    let mut observations = vec![];
    for (i, outcome) in extracted.into_iter().enumerate() {
        match outcome {
            Ok(symbols) => {
                ids.push(pieces[i].id());
                surviving_indices.push(i);
                observations.push(symbols);
            }
            Err(e) if e.is_recoverable() => warn!("skipping piece {}: {}", i, e),
            Err(e) => return Err(e),
        }
    }

    let matrices = features
        .iter()
        .enumerate()
        .map(|(f, name)| {
            let domain = build_domain(observations.iter().map(|piece| &piece[f]), params.upper_bound);
            let positions: BTreeMap<Symbol, usize> = domain.iter().enumerate().map(|(i, s)| (*s, i)).collect();
            let rows = observations
                .iter()
                .map(|piece| FeatureDistribution::tally(&piece[f], &positions))
                .collect();
            (name.clone(), FeatureMatrix {domain, rows})
        })
        .collect();
    info!(
        pieces = pieces.len(),
        surviving = ids.len(),
        features = features.len(),
        "extracted features"
    );
    Ok(FeatureSet {ids, surviving_indices, matrices})
}
