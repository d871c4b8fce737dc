//! Error types for style ranking.
//!
//! Per-piece problems (`UnreadablePiece`) are recovered by the extraction
//! pipeline. Every other variant aborts the whole operation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StyleRankError {
    /// A single piece could not be decoded or produced no usable chords.
    #[error("Unreadable piece {piece}: {reason}")]
    UnreadablePiece { piece: String, reason: String },

    /// One label class has no surviving pieces.
    #[error("No usable pieces in the {class} set")]
    EmptyClass { class: String },

    /// A feature matrix is not finite or does not line up with the pieces.
    #[error("Malformed feature {feature}: {reason}")]
    MalformedFeature { feature: String, reason: String },

    #[error("No features left to compare after filtering")]
    NoFeatures,

    #[error("Invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    /// Raised while building a registry, never at query time.
    #[error("Feature {name} was registered without an explicit tag")]
    UntaggedFeature { name: String },

    #[error("Feature {name} was registered twice")]
    DuplicateFeature { name: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

impl StyleRankError {
    pub fn unreadable<P: ToString, R: ToString>(piece: P, reason: R) -> Self {
        StyleRankError::UnreadablePiece {
            piece: piece.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_parameter<V: ToString, R: ToString>(name: &str, value: V, reason: R) -> Self {
        StyleRankError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed<R: ToString>(feature: &str, reason: R) -> Self {
        StyleRankError::MalformedFeature {
            feature: feature.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Per-piece errors are skipped by the pipeline; everything else is fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StyleRankError::UnreadablePiece { .. })
    }
}

pub type Result<T> = std::result::Result<T, StyleRankError>;

#[cfg(test)]
mod tests {
    use crate::StyleRankError;

    #[test]
    fn test_only_piece_errors_recover() {
        assert!(StyleRankError::unreadable("a.mid", "truncated header").is_recoverable());
        assert!(!StyleRankError::NoFeatures.is_recoverable());
        assert!(!StyleRankError::EmptyClass { class: "reference".to_string() }.is_recoverable());
    }

    #[test]
    fn test_messages_name_the_offender() {
        let e = StyleRankError::invalid_parameter("max_depth", 0, "must be at least 1");
        assert_eq!(e.to_string(), "Invalid parameter max_depth=0: must be at least 1");
        let e = StyleRankError::malformed("ChordSize", "3 rows for 4 pieces");
        assert!(e.to_string().contains("ChordSize"));
    }
}
