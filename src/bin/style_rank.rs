use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use style_rank::{get_features, rank, MidiFile, RankOptions, FEATURE_REGISTRY};
use tracing::info;

/// Rank MIDI pieces by stylistic similarity to a corpus
#[derive(Parser, Debug)]
#[command(name = "style_rank", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List feature names carrying a tag
    Names {
        #[arg(long, default_value = "ALL")]
        tag: String,
    },

    /// Write one CSV of histograms per feature
    Features {
        #[arg(required = true)]
        pieces: Vec<PathBuf>,

        #[arg(long, value_name = "DIR")]
        out_dir: PathBuf,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Rank candidates against a reference corpus
    Rank {
        #[arg(long, num_args = 1.., required = true)]
        corpus: Vec<PathBuf>,

        #[arg(long, num_args = 1.., required = true)]
        candidates: Vec<PathBuf>,

        /// Also write {piece: score} here, ascending by score
        #[arg(long, value_name = "FILE")]
        json: Option<PathBuf>,

        #[command(flatten)]
        tuning: Tuning,
    },
}

/// Overrides applied on top of the defaults or `--config`.
#[derive(clap::Args, Debug)]
struct Tuning {
    /// TOML file with any of the options below
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feature to use (repeatable); defaults to the ORIGINAL tag
    #[arg(long = "feature")]
    features: Vec<String>,

    #[arg(long)]
    upper_bound: Option<usize>,

    #[arg(long)]
    resolution: Option<u32>,

    #[arg(long)]
    include_offsets: bool,

    #[arg(long)]
    n_estimators: Option<usize>,

    #[arg(long)]
    max_depth: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    min_chords: Option<usize>,
}

impl Tuning {
    fn options(&self) -> anyhow::Result<RankOptions> {
        let mut options = match &self.config {
            Some(path) => RankOptions::load(path)?,
            None => RankOptions::default(),
        };
        if !self.features.is_empty() {
            options.feature_names = self.features.clone();
        }
        options.upper_bound = self.upper_bound.unwrap_or(options.upper_bound);
        options.resolution = self.resolution.unwrap_or(options.resolution);
        options.include_offsets |= self.include_offsets;
        options.n_estimators = self.n_estimators.unwrap_or(options.n_estimators);
        options.max_depth = self.max_depth.unwrap_or(options.max_depth);
        options.seed = self.seed.unwrap_or(options.seed);
        options.min_chords = self.min_chords.unwrap_or(options.min_chords);
        options.validate()?;
        Ok(options)
    }
}

fn midi_files(paths: &[PathBuf]) -> Vec<MidiFile> {
    paths.iter().map(MidiFile::new).collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("style_rank=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Names {tag} => {
            let names = FEATURE_REGISTRY.get_feature_names(&tag);
            if names.is_empty() {
                bail!("No features carry the tag {tag}");
            }
            for name in names {
                println!("{name}");
            }
        }
        Command::Features {pieces, out_dir, tuning} => {
            let options = tuning.options()?;
            let features = get_features(&midi_files(&pieces), &options.feature_names, &options.extraction())?;
            features.write_csv(&out_dir)?;
            info!(pieces = features.len(), dir = %out_dir.display(), "wrote feature tables");
        }
        Command::Rank {corpus, candidates, json, tuning} => {
            let options = tuning.options()?;
            let ranking = rank(&midi_files(&candidates), &midi_files(&corpus), &options)?;
            for (place, piece) in ranking.pieces().iter().enumerate() {
                println!("{:>3} {:.4} {}", place + 1, piece.score, piece.id);
            }
            if let Some(path) = json {
                ranking.write_json(&path)?;
                info!(path = %path.display(), "wrote scores");
            }
        }
    }
    Ok(())
}
