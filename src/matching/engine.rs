//! Batch runner: one [`MatchResult`] per decodable probe in a directory,
//! one [`LoadFailure`] per probe that could not be decoded.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use super::{MatchResult, Matcher};
use crate::cache::TemplateCache;
use crate::catalog::{list_images, Catalog, CatalogError, LoadFailure};
use crate::error::ExitCode;
use crate::imaging::ProbeIcon;
use crate::progress::{ProgressCallback, PHASE_MATCH};

/// Fatal batch errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The probe directory could not be listed.
    #[error("Cannot read probe directory: {0}")]
    Probes(#[from] CatalogError),
}

/// Totals for a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    /// Probes that produced a result.
    pub probes: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Probes that could not be loaded.
    pub failed: usize,
    /// Templates in the catalog.
    pub templates: usize,
    #[serde(with = "crate::catalog::builder::duration_secs")]
    pub duration: Duration,
}

/// Results and failures of a batch, in probe file-name order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<MatchResult>,
    pub failures: Vec<LoadFailure>,
    pub summary: BatchSummary,
}

impl BatchReport {
    /// Exit code for this batch.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::for_batch(self.summary.accepted, self.summary.failed)
    }
}

/// Runs a [`Matcher`] over many probes.
pub struct MatchEngine {
    matcher: Matcher,
    threads: usize,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEngine")
            .field("matcher", &self.matcher.kind())
            .field("threads", &self.threads)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl MatchEngine {
    #[must_use]
    pub fn new(matcher: Matcher) -> Self {
        Self {
            matcher,
            threads: 0,
            progress: None,
        }
    }

    /// Worker threads; 0 uses the global rayon pool.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    #[must_use]
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Prepare the catalog for the matcher, then match every probe in `probe_dir`.
    ///
    /// Probes that cannot be decoded, or whose format is unsupported, are
    /// recorded as failures; the batch continues.
    ///
    /// # Errors
    ///
    /// Fails only when `probe_dir` is missing or not a directory.
    pub fn match_directory(
        &self,
        probe_dir: &Path,
        catalog: &Catalog,
        cache: Option<&TemplateCache>,
    ) -> Result<BatchReport, EngineError> {
        let start = Instant::now();
        let listing = list_images(probe_dir)?;
        log::info!(
            "Matching {} probes against {} templates",
            listing.images.len(),
            catalog.len()
        );

        let (results, mut failures) = self.run_in_pool(|| {
            self.matcher.prepare(catalog, cache, self.progress.as_ref());
            self.match_paths(&listing.images, catalog)
        });
        failures.extend(listing.unsupported_failures());
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        let accepted = results.iter().filter(|r| r.accepted).count();
        let summary = BatchSummary {
            probes: results.len(),
            accepted,
            rejected: results.len() - accepted,
            failed: failures.len(),
            templates: catalog.len(),
            duration: start.elapsed(),
        };
        log::info!(
            "Matched {} probes: {} accepted, {} rejected, {} failed in {:.2}s",
            summary.probes,
            summary.accepted,
            summary.rejected,
            summary.failed,
            summary.duration.as_secs_f64()
        );

        Ok(BatchReport {
            results,
            failures,
            summary,
        })
    }

    /// Match already loaded probes, preserving their order.
    #[must_use]
    pub fn match_probes(&self, probes: &[ProbeIcon], catalog: &Catalog) -> Vec<MatchResult> {
        self.run_in_pool(|| {
            probes
                .par_iter()
                .map(|probe| self.matcher.match_probe(probe, catalog))
                .collect()
        })
    }

    fn match_paths(
        &self,
        paths: &[std::path::PathBuf],
        catalog: &Catalog,
    ) -> (Vec<MatchResult>, Vec<LoadFailure>) {
        if let Some(cb) = &self.progress {
            cb.on_phase_start(PHASE_MATCH, paths.len());
        }
        let done = AtomicUsize::new(0);

        let outcomes: Vec<Result<MatchResult, LoadFailure>> = paths
            .par_iter()
            .map(|path| {
                let outcome = ProbeIcon::load(path)
                    .map(|probe| self.matcher.match_probe(&probe, catalog))
                    .map_err(|e| LoadFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = &self.progress {
                    cb.on_progress(n, path.to_string_lossy().as_ref());
                }
                outcome
            })
            .collect();

        if let Some(cb) = &self.progress {
            cb.on_phase_end(PHASE_MATCH);
        }

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(failure) => {
                    log::warn!("Skipping probe {}: {}", failure.path.display(), failure.error);
                    failures.push(failure);
                }
            }
        }
        (results, failures)
    }

    fn run_in_pool<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        if self.threads == 0 {
            return op();
        }
        match rayon::ThreadPoolBuilder::new().num_threads(self.threads).build() {
            Ok(pool) => pool.install(op),
            Err(e) => {
                log::warn!(
                    "Failed to create thread pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
                op()
            }
        }
    }
}
