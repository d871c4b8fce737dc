use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Result, StyleRankError};

pub const DEFAULT_UPPER_BOUND: usize = 500;
pub const DEFAULT_N_ESTIMATORS: usize = 500;
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Valid and recommended bounds for one numeric knob. Values outside `lo..=hi`
/// are rejected; values inside but outside the recommended range only warn.
#[derive(Copy, Clone, Debug)]
pub struct ParamRange<T: Copy + Clone> {
    name: &'static str,
    lo: T,
    hi: T,
    recommended_lo: T,
    recommended_hi: T,
}

impl <T: Copy + Clone + PartialOrd + Display> ParamRange<T> {
    pub const fn new(name: &'static str, lo: T, hi: T, recommended_lo: T, recommended_hi: T) -> Self {
        ParamRange {name, lo, hi, recommended_lo, recommended_hi}
    }

    pub fn name(&self) -> &str {self.name}

    pub fn make_range(&self) -> RangeInclusive<T> {
        self.lo..=self.hi
    }

    pub fn make_recommended_range(&self) -> RangeInclusive<T> {
        self.recommended_lo..=self.recommended_hi
    }

    pub fn check(&self, value: T) -> Result<()> {
        if !self.make_range().contains(&value) {
            return Err(StyleRankError::invalid_parameter(
                self.name,
                value,
                format!("must be within {}..={}", self.lo, self.hi),
            ));
        }
        if !self.make_recommended_range().contains(&value) {
            warn!(
                parameter = self.name,
                %value,
                "outside the recommended range {}..={}",
                self.recommended_lo,
                self.recommended_hi
            );
        }
        Ok(())
    }
}

pub const UPPER_BOUND_RANGE: ParamRange<usize> = ParamRange::new("upper_bound", 1, 1_000_000, 2, 1000);
pub const RESOLUTION_RANGE: ParamRange<u32> = ParamRange::new("resolution", 0, 960, 0, 32);
pub const N_ESTIMATORS_RANGE: ParamRange<usize> = ParamRange::new("n_estimators", 1, 100_000, 10, 2000);
pub const MAX_DEPTH_RANGE: ParamRange<usize> = ParamRange::new("max_depth", 1, 64, 1, 30);
pub const MIN_CHORDS_RANGE: ParamRange<usize> = ParamRange::new("min_chords", 1, 1_000_000, 1, 100);

/// Knobs that shape how a piece becomes chords and histograms.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ExtractionParams {
    pub upper_bound: usize,
    pub resolution: u32,
    pub include_offsets: bool,
    pub min_chords: usize,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        ExtractionParams {
            upper_bound: DEFAULT_UPPER_BOUND,
            resolution: 0,
            include_offsets: false,
            min_chords: 1,
        }
    }
}

impl ExtractionParams {
    pub fn validate(&self) -> Result<()> {
        UPPER_BOUND_RANGE.check(self.upper_bound)?;
        RESOLUTION_RANGE.check(self.resolution)?;
        MIN_CHORDS_RANGE.check(self.min_chords)
    }

    pub fn is_quantized(&self) -> bool {
        self.resolution > 0
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_depth: DEFAULT_MAX_DEPTH,
            seed: 0,
        }
    }
}

impl ForestParams {
    pub fn validate(&self) -> Result<()> {
        N_ESTIMATORS_RANGE.check(self.n_estimators)?;
        MAX_DEPTH_RANGE.check(self.max_depth)
    }
}

/// Everything a ranking run needs, loadable from TOML. Missing keys take
/// their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankOptions {
    pub feature_names: Vec<String>,
    pub upper_bound: usize,
    pub resolution: u32,
    pub include_offsets: bool,
    pub n_estimators: usize,
    pub max_depth: usize,
    pub seed: u64,
    pub min_chords: usize,
}

impl Default for RankOptions {
    fn default() -> Self {
        let extraction = ExtractionParams::default();
        let forest = ForestParams::default();
        RankOptions {
            feature_names: vec![],
            upper_bound: extraction.upper_bound,
            resolution: extraction.resolution,
            include_offsets: extraction.include_offsets,
            n_estimators: forest.n_estimators,
            max_depth: forest.max_depth,
            seed: forest.seed,
            min_chords: extraction.min_chords,
        }
    }
}

impl RankOptions {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn extraction(&self) -> ExtractionParams {
        ExtractionParams {
            upper_bound: self.upper_bound,
            resolution: self.resolution,
            include_offsets: self.include_offsets,
            min_chords: self.min_chords,
        }
    }

    pub fn forest(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            seed: self.seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.extraction().validate()?;
        self.forest().validate()
    }
}
