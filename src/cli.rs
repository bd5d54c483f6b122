//! Command-line interface definitions for equipmatch.
//!
//! Global options (verbosity, config file, cache directory, error format)
//! apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Populate the cache from a catalog of reference icons
//! equipmatch build-cache ./catalog --with-descriptors
//!
//! # Identify every cropped icon in ./probes, CSV to a file
//! equipmatch match ./catalog ./probes --format csv --output-file results.csv
//!
//! # Use the descriptor fallback with debug logging
//! equipmatch -v match ./catalog ./probes --matcher descriptor
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::matching::MatcherKind;

/// Identify equipment icons against a catalog of reference templates.
///
/// Probes are scored by pattern correlation, refined by perceptual color
/// comparison of the icon body, and optionally verified by keypoint matching.
#[derive(Debug, Parser)]
#[command(name = "equipmatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (TOML); defaults to the platform config directory
    #[arg(long, value_name = "FILE", global = true, env = "EQUIPMATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory; overrides the configuration
    #[arg(long = "cache", value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Print errors as JSON objects on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compute and persist template features for a catalog directory
    BuildCache(BuildCacheArgs),
    /// Match every probe icon in a directory against a catalog
    Match(MatchArgs),
    /// Show what the cache holds
    CacheInfo,
    /// Remove every cache entry
    ClearCache,
}

/// Arguments for `build-cache`.
#[derive(Debug, Args)]
pub struct BuildCacheArgs {
    /// Directory of reference icons; each file stem is a template id
    #[arg(value_name = "CATALOG")]
    pub catalog: PathBuf,

    /// Recompute every entry even when it is up to date
    #[arg(long)]
    pub force: bool,

    /// Also extract descriptor sets for the descriptor matcher
    #[arg(long)]
    pub with_descriptors: bool,
}

/// Arguments for `match`.
#[derive(Debug, Args)]
pub struct MatchArgs {
    /// Directory of reference icons
    #[arg(value_name = "CATALOG")]
    pub catalog: PathBuf,

    /// Directory of cropped probe icons
    #[arg(value_name = "PROBES")]
    pub probes: PathBuf,

    /// Matching strategy; defaults to the configured one
    #[arg(short, long, value_enum)]
    pub matcher: Option<MatcherKind>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Write results to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Include every template's scores for each probe (JSON only)
    #[arg(long)]
    pub diagnostics: bool,

    /// Minimum composite score for a match to be accepted (0-100)
    #[arg(long, value_name = "SCORE", value_parser = parse_score)]
    pub accept_threshold: Option<f64>,

    /// Minimum pattern score for color verification (0-100)
    #[arg(long, value_name = "SCORE", value_parser = parse_score)]
    pub pattern_threshold: Option<f64>,

    /// Worker threads (0 lets the runtime decide)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

/// Output format for match results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty JSON with a summary block
    #[default]
    Json,
    /// One CSV row per probe
    Csv,
}

/// Parse a score in `0..=100`.
///
/// # Errors
///
/// Returns a message when the value is not a number or out of range.
pub fn parse_score(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid score '{s}': expected a number between 0 and 100"))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("score {value} is out of range 0-100"));
    }
    Ok(value)
}
