//! equipmatch - Equipment Icon Matching Engine
//!
//! Identifies which reference icon from a fixed catalog a cropped screenshot
//! icon depicts. Probes are scored by normalized cross-correlation, refined by
//! a perceptual (L*a*b*) color comparison restricted to the icon body, and can
//! alternatively be verified by keypoint matching with a RANSAC homography.
//! Per-template derived data lives in a persistent, content-hash keyed cache.

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod matching;
pub mod output;
pub mod progress;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::cache::TemplateCache;
use crate::catalog::{CacheBuilder, Catalog};
use crate::cli::{BuildCacheArgs, Cli, Commands, MatchArgs, OutputFormat};
use crate::config::Config;
use crate::error::ExitCode;
use crate::matching::{MatchEngine, Matcher};
use crate::output::{CsvOutput, JsonOutput};
use crate::progress::{Progress, ProgressCallback};

/// Run the CLI: set up logging and configuration, then execute the subcommand.
///
/// # Errors
///
/// Fatal problems only: unreadable configuration, a missing catalog or probe
/// directory, an unwritable cache directory or output file. Per-file failures
/// are reported through the exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let cache_dir = match &cli.cache_dir {
        Some(dir) => dir.clone(),
        None => config
            .cache_dir_or_default()
            .context("Failed to determine the cache directory")?,
    };
    let progress: Arc<dyn ProgressCallback> = Arc::new(Progress::new(cli.quiet));

    match cli.command {
        Commands::BuildCache(args) => build_cache(&args, &config, &cache_dir, progress),
        Commands::Match(args) => run_match(&args, config, &cache_dir, progress),
        Commands::CacheInfo => {
            let cache = open_cache(&cache_dir)?;
            let info = cache.info();
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize cache info")?
            );
            Ok(ExitCode::Success)
        }
        Commands::ClearCache => {
            let cache = open_cache(&cache_dir)?;
            let removed = cache.clear();
            println!("Removed {} cache entries from {}", removed, cache.dir().display());
            Ok(ExitCode::Success)
        }
    }
}

fn open_cache(dir: &Path) -> anyhow::Result<TemplateCache> {
    TemplateCache::open(dir).with_context(|| format!("Failed to open cache at {}", dir.display()))
}

fn build_cache(
    args: &BuildCacheArgs,
    config: &Config,
    cache_dir: &Path,
    progress: Arc<dyn ProgressCallback>,
) -> anyhow::Result<ExitCode> {
    let cache = open_cache(cache_dir)?;
    let summary = CacheBuilder::new()
        .with_force(args.force)
        .with_descriptors(args.with_descriptors, config.descriptor.clone())
        .with_progress(progress)
        .build(&args.catalog, &cache)
        .with_context(|| format!("Failed to build cache from {}", args.catalog.display()))?;

    for failure in &summary.failures {
        log::warn!("{}: {}", failure.path.display(), failure.error);
    }
    println!(
        "{} templates: {} up to date, {} computed, {} failed, {} pruned",
        summary.processed, summary.fresh, summary.recomputed, summary.failed, summary.pruned
    );

    Ok(if summary.is_complete() {
        ExitCode::Success
    } else {
        ExitCode::PartialSuccess
    })
}

fn run_match(
    args: &MatchArgs,
    mut config: Config,
    cache_dir: &Path,
    progress: Arc<dyn ProgressCallback>,
) -> anyhow::Result<ExitCode> {
    // CLI flags are the last configuration layer.
    if let Some(threshold) = args.accept_threshold {
        config.scoring.accept_threshold = threshold;
    }
    if let Some(threshold) = args.pattern_threshold {
        config.scoring.pattern_threshold = threshold;
    }
    if let Some(threads) = args.threads {
        config.threads = threads;
    }
    if let Some(kind) = args.matcher {
        config.matcher = kind;
    }

    let cache = open_cache(cache_dir)?;
    let catalog = Catalog::load_with_progress(&args.catalog, &cache, Some(&progress))
        .with_context(|| format!("Failed to load catalog {}", args.catalog.display()))?;
    if catalog.is_empty() {
        log::warn!("Catalog {} has no usable templates", args.catalog.display());
    }

    let matcher = Matcher::from_kind(
        config.matcher,
        &config.scoring,
        &config.mask,
        &config.descriptor,
        args.diagnostics,
    );
    let report = MatchEngine::new(matcher)
        .with_threads(config.threads)
        .with_progress(progress)
        .match_directory(&args.probes, &catalog, Some(&cache))
        .with_context(|| format!("Failed to match probes in {}", args.probes.display()))?;

    match &args.output_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file {}", path.display()))?;
            write_report(&report, args, BufWriter::new(file))?;
            log::info!("Wrote results to {}", path.display());
        }
        None => write_report(&report, args, io::stdout().lock())?,
    }

    let code = report.exit_code();
    if code == ExitCode::Success && !catalog.failures().is_empty() {
        return Ok(ExitCode::PartialSuccess);
    }
    Ok(code)
}

fn write_report<W: Write>(
    report: &matching::BatchReport,
    args: &MatchArgs,
    writer: W,
) -> anyhow::Result<()> {
    match args.format {
        OutputFormat::Json => JsonOutput::new(report, args.diagnostics)
            .write_to(writer)
            .context("Failed to write JSON output"),
        OutputFormat::Csv => CsvOutput::new(&report.results)
            .write_to(writer)
            .context("Failed to write CSV output"),
    }
}
