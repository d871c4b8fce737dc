use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ordered_float::OrderedFloat;
use serde::ser::{Serialize, Serializer};
use tracing::info;

use crate::{get_features, Label, PieceSource, RankOptions, Result, SimilarityEngine, SimilarityMatrix};

#[derive(Clone, Debug, PartialEq)]
pub struct RankedPiece {
    pub id: String,
    /// Position in the candidate list passed to `rank`.
    pub index: usize,
    pub score: f64,
}

/// Candidates ordered from most to least similar to the reference corpus.
#[derive(Clone, Debug, PartialEq)]
pub struct Ranking {
    pieces: Vec<RankedPiece>,
}

/// A repeated id keeps only its best-ranked entry, so every JSON key is unique.
struct AscendingScores<'a>(&'a [RankedPiece]);

impl <'a> Serialize for AscendingScores<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seen = BTreeSet::new();
        let mut ascending: Vec<&RankedPiece> = self.0.iter().filter(|p| seen.insert(p.id.as_str())).collect();
        ascending.sort_by_key(|p| OrderedFloat(p.score));
        serializer.collect_map(ascending.iter().map(|p| (p.id.as_str(), p.score)))
    }
}

impl Ranking {
    /// Scores each candidate row by its summed similarity to every reference
    /// row; ties keep input order.
    pub fn from_similarity(matrix: &SimilarityMatrix, labels: &[Label], ids: &[String], indices: &[usize]) -> Self {
        let references: Vec<usize> = (0..labels.len()).filter(|j| labels[*j] == Label::Reference).collect();
        let mut pieces: Vec<RankedPiece> = (0..labels.len())
            .filter(|i| labels[*i] == Label::Candidate)
            .map(|i| RankedPiece {
                id: ids[i].clone(),
                index: indices[i],
                score: references.iter().map(|j| matrix.get(i, *j)).sum(),
            })
            .collect();
        pieces.sort_by_key(|p| Reverse(OrderedFloat(p.score)));
        Ranking {pieces}
    }

    pub fn pieces(&self) -> &[RankedPiece] {&self.pieces}

    pub fn len(&self) -> usize {self.pieces.len()}

    pub fn is_empty(&self) -> bool {self.pieces.is_empty()}

    pub fn ids(&self) -> Vec<&str> {
        self.pieces.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&AscendingScores(&self.pieces))?)
    }

    /// Writes `{id: score}` with entries in ascending score order.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(out, &AscendingScores(&self.pieces))?;
        Ok(())
    }
}

/// Ranks `candidates` by stylistic affinity to `reference`. Unreadable pieces
/// on either side are dropped; a side with nothing left is an error.
pub fn rank<C: PieceSource, R: PieceSource>(candidates: &[C], reference: &[R], options: &RankOptions) -> Result<Ranking> {
    options.validate()?;
    let sources: Vec<&dyn PieceSource> = candidates
        .iter()
        .map(|c| c as &dyn PieceSource)
        .chain(reference.iter().map(|r| r as &dyn PieceSource))
        .collect();
    let features = get_features(&sources, &options.feature_names, &options.extraction())?;
    let labels: Vec<Label> = features
        .surviving_indices()
        .iter()
        .map(|i| if *i < candidates.len() {Label::Candidate} else {Label::Reference})
        .collect();
    let matrix = SimilarityEngine::new(options.forest()).similarity(&features.distributions(), &labels)?;
    let ranking = Ranking::from_similarity(&matrix, &labels, features.ids(), features.surviving_indices());
    info!(
        candidates = ranking.len(),
        reference = labels.iter().filter(|l| **l == Label::Reference).count(),
        "ranked"
    );
    Ok(ranking)
}

#[cfg(test)]
mod tests {
    use crate::chords::tests::example_score;
    use crate::{rank, InMemoryPiece, RankOptions, Score, StyleRankError};

    fn triad_piece(id: &str, root: u8) -> InMemoryPiece {
        let triples: Vec<(u8, u64, u64)> = (0..10)
            .flat_map(|k| [(root, k, 1), (root + 4, k, 1), (root + 7, k, 1)])
            .collect();
        InMemoryPiece::new(id, Score::from_triples(1, &triples))
    }

    fn options() -> RankOptions {
        RankOptions {n_estimators: 20, max_depth: 3, ..RankOptions::default()}
    }

    #[test]
    fn test_ranking_is_a_permutation() {
        let candidates = vec![
            triad_piece("a", 60),
            InMemoryPiece::new("b", example_score()),
            triad_piece("c", 62),
        ];
        let reference = vec![triad_piece("r1", 60), InMemoryPiece::new("r2", example_score())];
        let ranking = rank(&candidates, &reference, &options()).unwrap();
        let mut ids = ranking.ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);
        let scores: Vec<f64> = ranking.pieces().iter().map(|p| p.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(scores.iter().all(|s| (0.0..=2.0).contains(s)));
    }

    #[test]
    fn test_unreadable_side_is_fatal() {
        let silent = vec![InMemoryPiece::new("silent", Score::from_triples(1, &[]))];
        let reference = vec![triad_piece("r", 60)];
        match rank(&silent, &reference, &options()) {
            Err(StyleRankError::EmptyClass {class}) => assert_eq!(class, "candidate"),
            other => panic!("unexpected {:?}", other),
        }
        match rank(&reference, &silent, &options()) {
            Err(StyleRankError::EmptyClass {class}) => assert_eq!(class, "reference"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ties_keep_input_order() {
        let candidates = vec![triad_piece("z", 60), triad_piece("a", 60), triad_piece("m", 60)];
        let reference = vec![triad_piece("r", 60)];
        let ranking = rank(&candidates, &reference, &options()).unwrap();
        assert_eq!(ranking.ids(), vec!["z", "a", "m"]);
        assert!(ranking.pieces().iter().all(|p| p.score == ranking.pieces()[0].score));
        let indices: Vec<usize> = ranking.pieces().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let json = ranking.to_json().unwrap();
        let z = json.find("\"z\"").unwrap();
        let a = json.find("\"a\"").unwrap();
        let m = json.find("\"m\"").unwrap();
        assert!(z < a && a < m);
    }

    #[test]
    fn test_repeated_ids_appear_once_in_json() {
        let candidates = vec![triad_piece("twice", 60), triad_piece("twice", 60), triad_piece("other", 61)];
        let reference = vec![triad_piece("r", 60)];
        let ranking = rank(&candidates, &reference, &options()).unwrap();
        assert_eq!(ranking.len(), 3);
        let json = ranking.to_json().unwrap();
        assert_eq!(json.matches("\"twice\"").count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_json_is_ascending() {
        let candidates = vec![triad_piece("far", 61), triad_piece("near", 60)];
        let reference = vec![triad_piece("r", 60)];
        let ranking = rank(&candidates, &reference, &options()).unwrap();
        let json = ranking.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_object().unwrap().len(), 2);
        let first = ranking.pieces().last().unwrap();
        let second = ranking.pieces().first().unwrap();
        assert!(json.find(&format!("\"{}\"", first.id)).unwrap() < json.find(&format!("\"{}\"", second.id)).unwrap()
            || first.score == second.score);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranking.json");
        ranking.write_json(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), json);
    }
}
