//! Batch population of the template cache from a catalog directory.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{list_images, Catalog, CatalogError, LoadFailure};
use crate::cache::TemplateCache;
use crate::imaging::file_id;
use crate::matching::descriptor::{DescriptorConfig, DescriptorMatcher};
use crate::progress::ProgressCallback;

/// Counts reported by [`CacheBuilder::build`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildSummary {
    /// Files examined, including failures.
    pub processed: usize,
    /// Templates served from valid cache entries.
    pub fresh: usize,
    /// Templates whose entry was (re)computed.
    pub recomputed: usize,
    /// Files that could not be cached.
    pub failed: usize,
    /// Entries removed because their file is gone.
    pub pruned: usize,
    /// Descriptor sets extracted during this build.
    pub descriptors_computed: usize,
    pub failures: Vec<LoadFailure>,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
}

impl BuildSummary {
    /// Whether every file was cached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Walks a catalog and brings the cache up to date with it.
#[derive(Default)]
pub struct CacheBuilder {
    force: bool,
    with_descriptors: bool,
    descriptor_config: DescriptorConfig,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("force", &self.force)
            .field("with_descriptors", &self.with_descriptors)
            .field("descriptor_config", &self.descriptor_config)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl CacheBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute every entry regardless of freshness.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Also extract and persist descriptor sets.
    #[must_use]
    pub fn with_descriptors(mut self, enabled: bool, config: DescriptorConfig) -> Self {
        self.with_descriptors = enabled;
        self.descriptor_config = config;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Cache every image in `catalog_dir` and prune entries for removed files.
    ///
    /// # Errors
    ///
    /// Fails only when the catalog directory is missing or unreadable;
    /// individual files that fail are counted in the summary.
    pub fn build(&self, catalog_dir: &Path, cache: &TemplateCache) -> Result<BuildSummary, CatalogError> {
        let start = Instant::now();

        if self.force {
            let listing = list_images(catalog_dir)?;
            let invalidated = listing
                .images
                .iter()
                .filter(|path| cache.invalidate(&file_id(path)))
                .count();
            log::info!("Forced rebuild: invalidated {} cache entries", invalidated);
        }

        let catalog = Catalog::load_with_progress(catalog_dir, cache, self.progress.as_ref())?;
        let fresh = catalog.templates().iter().filter(|t| t.fresh).count();
        let pruned = cache.prune(&catalog.ids());

        let descriptors_computed = if self.with_descriptors {
            let matcher = DescriptorMatcher::new(self.descriptor_config.clone());
            catalog.prepare_descriptors(Some(cache), &matcher, self.progress.as_ref())
        } else {
            0
        };

        let failures = catalog.failures().to_vec();
        let summary = BuildSummary {
            processed: catalog.len() + failures.len(),
            fresh,
            recomputed: catalog.len() - fresh,
            failed: failures.len(),
            pruned,
            descriptors_computed,
            failures,
            duration: start.elapsed(),
        };

        log::info!(
            "Cache build: {} processed, {} fresh, {} recomputed, {} failed, {} pruned in {:.2}s",
            summary.processed,
            summary.fresh,
            summary.recomputed,
            summary.failed,
            summary.pruned,
            summary.duration.as_secs_f64()
        );
        Ok(summary)
    }
}

pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
