mod error;
mod pitch_classes;
mod chords;
mod source;
mod midi;
mod config;
mod features;
mod pipeline;
mod forest;
mod similarity;
mod ranking;

pub use error::*;
pub use pitch_classes::*;
pub use chords::*;
pub use source::*;
pub use midi::*;
pub use config::*;
pub use features::*;
pub use pipeline::*;
pub use forest::*;
pub use similarity::*;
pub use ranking::*;
