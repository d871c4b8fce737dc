use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bare_metal_modulo::MNum;
use enum_iterator::{all, Sequence};
use lazy_static::lazy_static;
use tracing::warn;

use crate::{
    pitch_class, pitch_interval, Chord, MidiByte, Piece, PitchClassSet, PitchClassTable, Result,
    StyleRankError, INTERVAL_CLASSES,
};

pub type Symbol = u64;

const TUPLE_FIELD_BITS: usize = 8;
const TUPLE_FIELD_MAX: u64 = (1 << TUPLE_FIELD_BITS) - 1;
const SHAPE_SPAN: u8 = 64;
const ONSET_SPAN: usize = 63;
const SAME_SET: Symbol = 100;
const PCD_TRAN_BITS: u32 = 24;
const MELODY_INTERVAL_WINDOW: usize = 5;
const MELODY_NGRAM_WINDOW: usize = 4;
const SIZE_NGRAM_WINDOW: usize = 3;

lazy_static! {
    pub static ref FEATURE_REGISTRY: FeatureRegistry =
        FeatureRegistry::builtin().expect("every built-in feature carries explicit tags");
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Sequence, Hash, Ord, PartialOrd)]
pub enum FeatureTag {
    All,
    Original,
    Chord,
    Transition,
    Interval,
    PitchClass,
    Onset,
    Rhythm,
    Dissonance,
    Melody,
}

impl FeatureTag {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureTag::All => "ALL",
            FeatureTag::Original => "ORIGINAL",
            FeatureTag::Chord => "CHORD",
            FeatureTag::Transition => "TRANSITION",
            FeatureTag::Interval => "INTERVAL",
            FeatureTag::PitchClass => "PITCH_CLASS",
            FeatureTag::Onset => "ONSET",
            FeatureTag::Rhythm => "RHYTHM",
            FeatureTag::Dissonance => "DISSONANCE",
            FeatureTag::Melody => "MELODY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        all::<FeatureTag>().find(|tag| tag.name() == name)
    }
}

impl Display for FeatureTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Turns a piece into the sequence of symbols it exhibits, one per observation.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, piece: &Piece, table: &PitchClassTable) -> Vec<Symbol>;
}

impl <F: Fn(&Piece, &PitchClassTable) -> Vec<Symbol> + Send + Sync> FeatureExtractor for F {
    fn extract(&self, piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
        self(piece, table)
    }
}

#[derive(Clone)]
pub struct Feature {
    name: String,
    tags: BTreeSet<FeatureTag>,
    extractor: Arc<dyn FeatureExtractor>,
}

impl Feature {
    pub fn new(name: &str, tags: &[FeatureTag], extractor: Arc<dyn FeatureExtractor>) -> Self {
        Feature {name: name.to_owned(), tags: tags.iter().copied().collect(), extractor}
    }

    pub fn name(&self) -> &str {self.name.as_str()}

    pub fn tags(&self) -> &BTreeSet<FeatureTag> {&self.tags}

    pub fn extract(&self, piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
        self.extractor.extract(piece, table)
    }
}

macro_rules! feature_vec {
    ($( ($s:expr, $f:expr, [$($tag:ident),+]) ),+ $(,)?) => {
        vec![$(Feature::new($s, &[$(FeatureTag::$tag),+], Arc::new($f)),)+]
    }
}

/// Name-ordered catalogue of extractors with a tag index.
#[derive(Clone, Default)]
pub struct FeatureRegistry {
    name2feature: BTreeMap<String, Feature>,
    tag2names: BTreeMap<FeatureTag, BTreeSet<String>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_features(features: Vec<Feature>) -> Result<Self> {
        let mut registry = Self::new();
        for feature in features {
            registry.register(feature)?;
        }
        Ok(registry)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_features(builtin_features())
    }

    /// Every feature needs at least one tag besides `ALL`, which is added here.
    pub fn register(&mut self, mut feature: Feature) -> Result<()> {
        if feature.tags.iter().all(|tag| *tag == FeatureTag::All) {
            return Err(StyleRankError::UntaggedFeature {name: feature.name.clone()});
        }
        if self.name2feature.contains_key(feature.name()) {
            return Err(StyleRankError::DuplicateFeature {name: feature.name.clone()});
        }
        feature.tags.insert(FeatureTag::All);
        for tag in feature.tags.iter() {
            self.tag2names.entry(*tag).or_default().insert(feature.name.clone());
        }
        self.name2feature.insert(feature.name.clone(), feature);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Feature> {
        self.name2feature.get(name)
    }

    pub fn len(&self) -> usize {self.name2feature.len()}

    pub fn is_empty(&self) -> bool {self.name2feature.is_empty()}

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.name2feature.keys().map(|name| name.as_str())
    }

    /// Names carrying `tag`; an unknown or empty tag gives an empty set.
    pub fn get_feature_names(&self, tag: &str) -> BTreeSet<String> {
        FeatureTag::from_name(tag)
            .and_then(|tag| self.tag2names.get(&tag))
            .cloned()
            .unwrap_or_default()
    }

    /// Keeps the registered names from `requested`, in order and without
    /// repeats. An empty request means every `ORIGINAL` feature.
    pub fn resolve(&self, requested: &[String]) -> Result<Vec<String>> {
        if requested.is_empty() {
            return Ok(self.get_feature_names(FeatureTag::Original.name()).into_iter().collect());
        }
        let mut seen = BTreeSet::new();
        let mut resolved = vec![];
        for name in requested {
            if !self.name2feature.contains_key(name) {
                warn!(feature = name.as_str(), "unknown feature ignored");
            } else if seen.insert(name.clone()) {
                resolved.push(name.clone());
            }
        }
        if resolved.is_empty() {
            return Err(StyleRankError::NoFeatures);
        }
        Ok(resolved)
    }
}

/// Packs up to eight small counts into one symbol, first value in the lowest
/// byte; each value saturates at 255.
pub fn nominal_tuple(values: &[u64]) -> Symbol {
    values
        .iter()
        .take(8)
        .enumerate()
        .fold(0, |packed, (i, v)| packed | ((*v).min(TUPLE_FIELD_MAX) << (TUPLE_FIELD_BITS * i)))
}

/// Smallest value among all cyclic rotations of the low `width` bits of `x`.
pub fn roll_to_min(x: u64, width: u32) -> u64 {
    let mask = (1u64 << width) - 1;
    let x = x & mask;
    (0..width)
        .map(|i| if i == 0 {x} else {((x >> i) | (x << (width - i))) & mask})
        .min()
        .unwrap_or(x)
}

fn per_chord<F: Fn(&Chord) -> Option<Symbol>>(piece: &Piece, f: F) -> Vec<Symbol> {
    piece.chords().iter().filter_map(f).collect()
}

fn per_transition<F: Fn(&Chord, &Chord) -> Option<Symbol>>(piece: &Piece, f: F) -> Vec<Symbol> {
    piece.chords().windows(2).filter_map(|pair| f(&pair[0], &pair[1])).collect()
}

fn pair_intervals(piece: &Piece) -> impl Iterator<Item = usize> + '_ {
    piece.chords().iter().flat_map(|chord| {
        let pitches = chord.pitches();
        let mut intervals = vec![];
        for (j, low) in pitches.iter().enumerate() {
            for high in pitches.iter().skip(j + 1) {
                intervals.push(pitch_interval(*low, *high));
            }
        }
        intervals
    })
}

/// Bass pitches of chords whose bass is struck at the chord's onset.
fn bass_line(piece: &Piece) -> Vec<MidiByte> {
    piece.chords().iter().filter(|c| c.bass_is_onset()).map(|c| c.lowest()).collect()
}

/// Top pitches of chords whose top note is struck at the chord's onset.
fn melody_line(piece: &Piece) -> Vec<MidiByte> {
    piece.chords().iter().filter(|c| c.top_is_onset()).map(|c| c.highest()).collect()
}

fn shape_of(pitches: &[MidiByte]) -> Option<Symbol> {
    let lowest = *pitches.first()?;
    Some(
        pitches
            .iter()
            .map(|p| p - lowest)
            .filter(|offset| *offset < SHAPE_SPAN)
            .fold(0, |shape, offset| shape | (1u64 << offset)),
    )
}

fn canonical(table: &PitchClassTable, pitches: &[MidiByte]) -> Symbol {
    table.canonical_form(PitchClassSet::from_pitches(pitches.iter().copied())).mask() as Symbol
}

fn motion_direction(from: MidiByte, to: MidiByte) -> i32 {
    (to as i32 - from as i32).signum()
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VoiceMotion {
    NoChange,
    Oblique,
    Parallel,
    Contrary,
}

impl VoiceMotion {
    pub fn between(a: &Chord, b: &Chord) -> Self {
        let top = motion_direction(a.highest(), b.highest());
        let bass = motion_direction(a.lowest(), b.lowest());
        match top.abs() + bass.abs() {
            0 => VoiceMotion::NoChange,
            1 => VoiceMotion::Oblique,
            _ if top == bass => VoiceMotion::Parallel,
            _ => VoiceMotion::Contrary,
        }
    }
}

fn interval_dist(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    pair_intervals(piece).map(|i| i as Symbol).collect()
}

fn interval_class_dist(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    pair_intervals(piece).map(|i| INTERVAL_CLASSES[i] as Symbol).collect()
}

fn chord_size(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(c.len() as Symbol))
}

fn chord_pc_size_ratio(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(nominal_tuple(&[c.pitch_class_set().len() as u64, c.len() as u64])))
}

fn chord_onset_ratio(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(nominal_tuple(&[c.onset_pitches().len() as u64, c.len() as u64])))
}

fn chord_distinct_duration_ratio(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        let releases: BTreeSet<u64> = c.notes().iter().map(|n| n.end()).collect();
        Some(nominal_tuple(&[releases.len() as u64, c.len() as u64]))
    })
}

fn chord_duration(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(piece.duration_symbol(c.duration())))
}

fn chord_shape(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| shape_of(&c.pitches()))
}

fn chord_onset_shape(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| shape_of(&c.onset_pitches()))
}

fn chord_pcd(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(canonical(table, &c.pitches())))
}

fn chord_pcd_w_bass(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        Some(pitch_class(c.lowest()).a() as Symbol + (canonical(table, &c.pitches()) << 12))
    })
}

fn chord_onset_pcd(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(canonical(table, &c.onset_pitches())))
}

fn chord_onset_tie_pcd(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        Some(canonical(table, &c.onset_pitches()) + (canonical(table, &c.tie_pitches()) << 12))
    })
}

fn chord_onset_tie_pcd_together(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        let rotation = table.rotation(c.pitch_class_set());
        let onsets = PitchClassSet::from_pitches(c.onset_pitches()).transposed(rotation);
        let ties = PitchClassSet::from_pitches(c.tie_pitches()).transposed(rotation);
        Some(onsets.mask() as Symbol + ((ties.mask() as Symbol) << 12))
    })
}

fn chord_tonnetz(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some(table.voice_leading_distance(c.pitch_class_set()) as Symbol))
}

fn chord_onset(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        let onsets = (0..c.len().min(ONSET_SPAN))
            .filter(|i| c.is_onset(*i))
            .fold(0 as Symbol, |bits, i| bits | (1u64 << i));
        Some(onsets | (1u64 << c.len().min(ONSET_SPAN)))
    })
}

fn chord_range(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| Some((c.highest() - c.lowest()) as Symbol))
}

fn chord_dissonance(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        let onsets = c.onset_pitches();
        (onsets.len() >= 2).then(|| table.periodicity(&onsets, &onsets).to_integer())
    })
}

fn chord_tran_dissonance(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    per_transition(piece, |a, b| {
        (a.len() >= 2 && b.len() >= 2).then(|| table.periodicity(&a.pitches(), &b.pitches()).to_integer())
    })
}

fn chord_lowest_interval(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_chord(piece, |c| {
        let pitches = c.pitches();
        (pitches.len() >= 2).then(|| (pitches[1] - pitches[0]) as Symbol)
    })
}

fn chord_size_ngram(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    piece
        .chords()
        .windows(SIZE_NGRAM_WINDOW)
        .map(|w| nominal_tuple(&w.iter().map(|c| c.len() as u64).collect::<Vec<_>>()))
        .collect()
}

fn chord_tran_voice_motion(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_transition(piece, |a, b| Some(VoiceMotion::between(a, b) as Symbol))
}

fn chord_tran_repeat(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_transition(piece, |a, b| {
        let all_onsets = b.onset_pitches().len() == b.len();
        (all_onsets && a.len() == b.len()).then(|| (a.pitches() == b.pitches()) as Symbol)
    })
}

fn scale_transition<F: Fn(u32, u32) -> u32>(piece: &Piece, table: &PitchClassTable, combine: F) -> Vec<Symbol> {
    per_transition(piece, |a, b| {
        let (a, b) = (a.pitch_class_set(), b.pitch_class_set());
        if a == b {
            Some(SAME_SET)
        } else {
            let scales = combine(table.scale_membership(a).bits(), table.scale_membership(b).bits());
            Some(scales.count_ones() as Symbol)
        }
    })
}

fn chord_tran_scale_distance(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    scale_transition(piece, table, |a, b| a ^ b)
}

fn chord_tran_scale_union(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    scale_transition(piece, table, |a, b| a | b)
}

fn chord_tran_distance(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_transition(piece, |a, b| {
        Some((a.highest().abs_diff(b.highest()) + a.lowest().abs_diff(b.lowest())) as Symbol)
    })
}

fn chord_tran_outer(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    per_transition(piece, |a, b| {
        (b.bass_is_onset() || b.top_is_onset()).then(|| {
            nominal_tuple(&[
                pitch_interval(a.lowest(), a.highest()) as u64,
                pitch_interval(b.lowest(), b.highest()) as u64,
                pitch_interval(a.lowest(), b.lowest()) as u64,
            ])
        })
    })
}

fn chord_tran_bass_interval(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    bass_line(piece)
        .windows(2)
        .map(|w| pitch_interval(w[0], w[1]) as Symbol)
        .collect()
}

fn chord_tran_melody_interval(piece: &Piece, table: &PitchClassTable) -> Vec<Symbol> {
    melody_line(piece)
        .windows(MELODY_INTERVAL_WINDOW)
        .map(|w| canonical(table, w))
        .collect()
}

fn chord_melody_ngram(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    melody_line(piece)
        .windows(MELODY_NGRAM_WINDOW)
        .map(|w| {
            let moves: Vec<u64> = w.windows(2).map(|step| pitch_interval(step[1], step[0]) as u64).collect();
            nominal_tuple(&moves)
        })
        .collect()
}

fn pcd_tran(piece: &Piece, _: &PitchClassTable) -> Vec<Symbol> {
    piece
        .onset_segments()
        .windows(2)
        .map(|w| roll_to_min(w[0].mask() as u64 | ((w[1].mask() as u64) << 12), PCD_TRAN_BITS))
        .collect()
}

fn builtin_features() -> Vec<Feature> {
    feature_vec!(
        ("IntervalDist", interval_dist, [Interval, Original]),
        ("IntervalClassDist", interval_class_dist, [Interval, Original]),
        ("ChordSize", chord_size, [Chord, Original]),
        ("ChordPCSizeRatio", chord_pc_size_ratio, [Chord, PitchClass, Original]),
        ("ChordOnsetRatio", chord_onset_ratio, [Chord, Onset, Original]),
        ("ChordDistinctDurationRatio", chord_distinct_duration_ratio, [Chord, Rhythm, Original]),
        ("ChordDuration", chord_duration, [Chord, Rhythm, Original]),
        ("ChordShape", chord_shape, [Chord, Original]),
        ("ChordOnsetShape", chord_onset_shape, [Chord, Onset, Original]),
        ("ChordPCD", chord_pcd, [Chord, PitchClass, Original]),
        ("ChordPCDWBass", chord_pcd_w_bass, [Chord, PitchClass, Original]),
        ("ChordOnsetPCD", chord_onset_pcd, [Chord, PitchClass, Onset, Original]),
        ("ChordOnsetTiePCD", chord_onset_tie_pcd, [Chord, PitchClass, Onset]),
        ("ChordOnsetTiePCDTogether", chord_onset_tie_pcd_together, [Chord, PitchClass, Onset]),
        ("ChordTonnetz", chord_tonnetz, [Chord, PitchClass, Original]),
        ("ChordOnset", chord_onset, [Chord, Onset, Original]),
        ("ChordRange", chord_range, [Chord, Original]),
        ("ChordDissonance", chord_dissonance, [Chord, Dissonance, Original]),
        ("ChordTranDissonance", chord_tran_dissonance, [Transition, Dissonance]),
        ("ChordLowestInterval", chord_lowest_interval, [Chord, Interval, Original]),
        ("ChordSizeNgram", chord_size_ngram, [Transition]),
        ("ChordTranVoiceMotion", chord_tran_voice_motion, [Transition, Original]),
        ("ChordTranRepeat", chord_tran_repeat, [Transition]),
        ("ChordTranScaleDistance", chord_tran_scale_distance, [Transition, PitchClass, Original]),
        ("ChordTranScaleUnion", chord_tran_scale_union, [Transition, PitchClass, Original]),
        ("ChordTranDistance", chord_tran_distance, [Transition, Original]),
        ("ChordTranOuter", chord_tran_outer, [Transition, Interval, Original]),
        ("ChordTranBassInterval", chord_tran_bass_interval, [Transition, Interval, Original]),
        ("ChordTranMelodyInterval", chord_tran_melody_interval, [Transition, Melody, Original]),
        ("ChordMelodyNgram", chord_melody_ngram, [Melody, Original]),
        ("PCDTran", pcd_tran, [Transition, PitchClass, Original]),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use crate::chords::tests::example_piece;
    use crate::{
        nominal_tuple, roll_to_min, ExtractionParams, Feature, FeatureRegistry, FeatureTag, Piece,
        PitchClassTable, Score, StyleRankError, Symbol, FEATURE_REGISTRY, PITCH_CLASS_TABLE,
    };

    fn histogram(name: &str) -> BTreeMap<Symbol, usize> {
        let mut counts = BTreeMap::new();
        for symbol in FEATURE_REGISTRY.get(name).unwrap().extract(&example_piece(), &PITCH_CLASS_TABLE) {
            *counts.entry(symbol).or_insert(0) += 1;
        }
        counts
    }

    fn expect(name: &str, pairs: &[(Symbol, usize)]) {
        assert_eq!(histogram(name), pairs.iter().copied().collect::<BTreeMap<_, _>>(), "{}", name);
    }

    #[test]
    fn test_builtin_registry() {
        assert_eq!(FEATURE_REGISTRY.len(), 31);
        assert_eq!(FEATURE_REGISTRY.get_feature_names("ALL").len(), 31);
        assert_eq!(FEATURE_REGISTRY.get_feature_names("ORIGINAL").len(), 26);
        assert_eq!(FEATURE_REGISTRY.get_feature_names("DISSONANCE").len(), 2);
        assert_eq!(FEATURE_REGISTRY.get_feature_names("MELODY").len(), 2);
        assert!(FEATURE_REGISTRY.get_feature_names("").is_empty());
        assert!(FEATURE_REGISTRY.get_feature_names("NOT_A_TAG").is_empty());
        for name in FEATURE_REGISTRY.names() {
            let tags = FEATURE_REGISTRY.get(name).unwrap().tags();
            assert!(tags.contains(&FeatureTag::All));
            assert!(tags.len() >= 2, "{}", name);
        }
    }

    #[test]
    fn test_registration_errors() {
        fn nothing(_: &Piece, _: &PitchClassTable) -> Vec<Symbol> {vec![]}
        let mut registry = FeatureRegistry::new();
        let untagged = registry.register(Feature::new("Nothing", &[], Arc::new(nothing)));
        assert!(matches!(untagged, Err(StyleRankError::UntaggedFeature {..})));
        let only_all = registry.register(Feature::new("Nothing", &[FeatureTag::All], Arc::new(nothing)));
        assert!(matches!(only_all, Err(StyleRankError::UntaggedFeature {..})));
        registry.register(Feature::new("Nothing", &[FeatureTag::Chord], Arc::new(nothing))).unwrap();
        let again = registry.register(Feature::new("Nothing", &[FeatureTag::Melody], Arc::new(nothing)));
        assert!(matches!(again, Err(StyleRankError::DuplicateFeature {..})));
        assert_eq!(registry.get_feature_names("CHORD").len(), 1);
        assert!(registry.get_feature_names("MELODY").is_empty());
    }

    #[test]
    fn test_resolve_names() {
        let resolved = FEATURE_REGISTRY
            .resolve(&["ChordSize".to_string(), "Bogus".to_string(), "ChordSize".to_string()])
            .unwrap();
        assert_eq!(resolved, vec!["ChordSize".to_string()]);
        assert_eq!(FEATURE_REGISTRY.resolve(&[]).unwrap().len(), 26);
        assert!(matches!(FEATURE_REGISTRY.resolve(&["Bogus".to_string()]), Err(StyleRankError::NoFeatures)));
    }

    #[test]
    fn test_tuple_packing() {
        assert_eq!(nominal_tuple(&[2, 3]), 2 | (3 << 8));
        assert_eq!(nominal_tuple(&[300]), 255);
        assert_eq!(roll_to_min(0b100, 3), 0b001);
        assert_eq!(roll_to_min(0b110, 3), 0b011);
        assert_eq!(roll_to_min(1 << 23, 24), 1);
    }

    #[test]
    fn test_chord_features() {
        expect("ChordSize", &[(2, 4), (3, 2)]);
        expect("ChordDuration", &[(8, 4), (16, 2)]);
        expect("ChordRange", &[(3, 1), (5, 2), (7, 1), (8, 2)]);
        expect("ChordLowestInterval", &[(3, 2), (5, 3), (8, 1)]);
        expect("ChordOnset", &[(0b111, 3), (0b1100, 1), (0b110, 1), (0b1110, 1)]);
        expect("ChordOnsetRatio", &[
            (nominal_tuple(&[2, 2]), 3),
            (nominal_tuple(&[1, 3]), 1),
            (nominal_tuple(&[1, 2]), 1),
            (nominal_tuple(&[2, 3]), 1),
        ]);
        expect("ChordDistinctDurationRatio", &[
            (nominal_tuple(&[2, 2]), 2),
            (nominal_tuple(&[3, 3]), 1),
            (nominal_tuple(&[1, 2]), 2),
            (nominal_tuple(&[2, 3]), 1),
        ]);
        expect("ChordPCSizeRatio", &[(nominal_tuple(&[2, 2]), 4), (nominal_tuple(&[3, 3]), 2)]);
        expect("ChordDissonance", &[(5, 3), (3, 1)]);
    }

    #[test]
    fn test_interval_features() {
        expect("IntervalDist", &[(3, 3), (4, 1), (5, 3), (7, 1), (8, 2)]);
        expect("IntervalClassDist", &[(3, 3), (4, 3), (5, 4)]);
    }

    #[test]
    fn test_transition_features() {
        expect("ChordTranDistance", &[(0, 1), (2, 1), (3, 1), (4, 2)]);
        expect("ChordTranVoiceMotion", &[(0, 1), (1, 2), (2, 1), (3, 1)]);
        expect("ChordTranBassInterval", &[(10, 1), (11, 1)]);
        expect("ChordMelodyNgram", &[
            (nominal_tuple(&[8, 2, 2]), 1),
            (nominal_tuple(&[2, 2, 10]), 1),
            (nominal_tuple(&[2, 10, 0]), 1),
        ]);
        assert_eq!(histogram("ChordTranMelodyInterval").values().sum::<usize>(), 2);
        assert_eq!(histogram("ChordSizeNgram").values().sum::<usize>(), 4);
        assert_eq!(histogram("PCDTran").values().sum::<usize>(), 5);
    }

    #[test]
    fn test_wide_clusters_stay_in_range() {
        let cluster: Vec<(u8, u64, u64)> = (30..100).map(|p| (p, 0, 1)).collect();
        let piece = Piece::new("cluster", &Score::from_triples(1, &cluster), &ExtractionParams::default()).unwrap();
        assert_eq!(piece.chords()[0].len(), 70);
        let onset = FEATURE_REGISTRY.get("ChordOnset").unwrap().extract(&piece, &PITCH_CLASS_TABLE);
        assert_eq!(onset, vec![u64::MAX]);
        for name in FEATURE_REGISTRY.names() {
            FEATURE_REGISTRY.get(name).unwrap().extract(&piece, &PITCH_CLASS_TABLE);
        }
    }

    #[test]
    fn test_pitch_class_features_are_transposition_invariant() {
        let piece = example_piece();
        let shifted = Piece::new(
            "shifted",
            &Score::from_triples(1, &[
                (65, 0, 2), (62, 0, 4), (69, 1, 2), (67, 3, 1), (65, 4, 1),
                (60, 4, 1), (59, 5, 2), (67, 5, 1), (67, 6, 2), (64, 6, 2),
            ]),
            &ExtractionParams::default(),
        ).unwrap();
        for name in ["ChordPCD", "ChordTonnetz", "ChordShape", "ChordOnsetTiePCDTogether", "ChordDissonance"] {
            let feature = FEATURE_REGISTRY.get(name).unwrap();
            assert_eq!(
                feature.extract(&piece, &PITCH_CLASS_TABLE),
                feature.extract(&shifted, &PITCH_CLASS_TABLE),
                "{}", name
            );
        }
    }
}
