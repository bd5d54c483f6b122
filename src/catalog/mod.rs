//! The reference catalog: templates loaded through the cache.
//!
//! A catalog is a flat directory of images; each file stem is a template id.
//! Loading reads every file, routes it through [`TemplateCache::get_or_compute`]
//! and keeps the decoded pixels alongside the cached histogram. Files that
//! cannot be read or decoded are recorded and skipped.

pub mod builder;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::cache::{ContentHash, TemplateCache};
use crate::imaging::{
    decode_rgb, file_id, is_supported_image, is_unsupported_image, read_bytes, PerceptualHistogram,
};
use crate::matching::color::{ColorVerifier, PreparedColor};
use crate::matching::descriptor::{DescriptorMatcher, DescriptorSet};
use crate::progress::{ProgressCallback, PHASE_CATALOG, PHASE_DESCRIPTORS};

pub use builder::{BuildSummary, CacheBuilder};

/// Fatal catalog errors. Per-file problems are [`LoadFailure`]s instead.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog directory does not exist.
    #[error("Catalog directory not found: {0}")]
    NotFound(PathBuf),

    /// The catalog path is not a directory.
    #[error("Catalog path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// The directory listing itself failed.
    #[error("Failed to list catalog directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A file that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

/// A reference icon with its cached derived data.
///
/// Fields are immutable once loaded; the descriptor and color slots are
/// filled at most once and may be read from any thread.
#[derive(Debug)]
pub struct ReferenceTemplate {
    pub id: String,
    pub path: PathBuf,
    pub pixels: RgbImage,
    pub content_hash: ContentHash,
    pub histogram: PerceptualHistogram,
    pub cached_at: DateTime<Utc>,
    /// Served from a valid cache entry rather than recomputed.
    pub fresh: bool,
    luma: OnceLock<GrayImage>,
    descriptors: OnceLock<DescriptorSet>,
    color: OnceLock<PreparedColor>,
}

impl ReferenceTemplate {
    /// Build a template outside the cache, computing the histogram directly.
    #[must_use]
    pub fn from_image(id: impl Into<String>, pixels: RgbImage) -> Self {
        let histogram = PerceptualHistogram::compute(&pixels);
        let content_hash = crate::cache::content_hash(pixels.as_raw());
        Self {
            id: id.into(),
            path: PathBuf::new(),
            pixels,
            content_hash,
            histogram,
            cached_at: Utc::now(),
            fresh: false,
            luma: OnceLock::new(),
            descriptors: OnceLock::new(),
            color: OnceLock::new(),
        }
    }

    /// Luminance of the template, converted on first use.
    pub fn luma(&self) -> &GrayImage {
        self.luma.get_or_init(|| image::imageops::grayscale(&self.pixels))
    }

    /// Descriptor set, if already prepared.
    #[must_use]
    pub fn descriptors(&self) -> Option<&DescriptorSet> {
        self.descriptors.get()
    }

    /// Descriptor set, extracting it on first use.
    pub fn descriptors_or_extract(&self, matcher: &DescriptorMatcher) -> &DescriptorSet {
        self.descriptors.get_or_init(|| matcher.extract(&self.pixels))
    }

    /// Fill the descriptor slot. Returns false if it was already set.
    pub fn set_descriptors(&self, descriptors: DescriptorSet) -> bool {
        self.descriptors.set(descriptors).is_ok()
    }

    /// Working-size mask and L*a*b* pixels, prepared on first use.
    pub fn prepared_color(&self, verifier: &ColorVerifier) -> &PreparedColor {
        self.color.get_or_init(|| verifier.prepare(&self.pixels))
    }
}

/// All templates of one catalog directory, sorted by id.
#[derive(Debug, Default)]
pub struct Catalog {
    root: PathBuf,
    templates: Vec<Arc<ReferenceTemplate>>,
    failures: Vec<LoadFailure>,
}

impl Catalog {
    /// Build a catalog from already constructed templates.
    #[must_use]
    pub fn from_templates(templates: Vec<ReferenceTemplate>) -> Self {
        let mut templates: Vec<Arc<ReferenceTemplate>> = templates.into_iter().map(Arc::new).collect();
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            root: PathBuf::new(),
            templates,
            failures: Vec::new(),
        }
    }

    /// Load every supported image in `dir` through `cache`.
    ///
    /// # Errors
    ///
    /// Fails only when `dir` is missing, not a directory, or cannot be listed.
    pub fn load(dir: &Path, cache: &TemplateCache) -> Result<Self, CatalogError> {
        Self::load_with_progress(dir, cache, None)
    }

    /// [`Catalog::load`] reporting through a progress callback.
    pub fn load_with_progress(
        dir: &Path,
        cache: &TemplateCache,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> Result<Self, CatalogError> {
        let listing = list_images(dir)?;
        let unsupported = listing.unsupported_failures();
        let (files, mut failures) = dedupe_ids(listing.images);
        failures.extend(unsupported);
        log::info!("Loading {} templates from {}", files.len(), dir.display());

        if let Some(cb) = progress {
            cb.on_phase_start(PHASE_CATALOG, files.len());
        }
        let done = AtomicUsize::new(0);

        let loaded: Vec<Result<ReferenceTemplate, LoadFailure>> = files
            .par_iter()
            .map(|path| {
                let result = load_template(path, cache);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = progress {
                    cb.on_progress(n, path.to_string_lossy().as_ref());
                }
                result
            })
            .collect();

        if let Some(cb) = progress {
            cb.on_phase_end(PHASE_CATALOG);
        }

        let mut templates = Vec::with_capacity(loaded.len());
        for result in loaded {
            match result {
                Ok(template) => templates.push(Arc::new(template)),
                Err(failure) => {
                    log::warn!("Skipping template {}: {}", failure.path.display(), failure.error);
                    failures.push(failure);
                }
            }
        }
        templates.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Self {
            root: dir.to_path_buf(),
            templates,
            failures,
        })
    }

    /// Directory the catalog was loaded from.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn templates(&self) -> &[Arc<ReferenceTemplate>] {
        &self.templates
    }

    /// Files that could not be loaded.
    #[must_use]
    pub fn failures(&self) -> &[LoadFailure] {
        &self.failures
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<ReferenceTemplate>> {
        self.templates
            .binary_search_by(|t| t.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.templates[i])
    }

    /// Set of template ids.
    #[must_use]
    pub fn ids(&self) -> HashSet<String> {
        self.templates.iter().map(|t| t.id.clone()).collect()
    }

    /// Fill every template's descriptor slot, reusing cached sets.
    ///
    /// Sets that had to be extracted are written back to the cache. Returns
    /// the number extracted.
    pub fn prepare_descriptors(
        &self,
        cache: Option<&TemplateCache>,
        matcher: &DescriptorMatcher,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) -> usize {
        if let Some(cb) = progress {
            cb.on_phase_start(PHASE_DESCRIPTORS, self.templates.len());
        }
        let done = AtomicUsize::new(0);
        let extracted = AtomicUsize::new(0);

        self.templates.par_iter().for_each(|template| {
            if template.descriptors().is_none() {
                let cached = cache.and_then(|c| c.get_fresh_features(&template.id, &template.content_hash));
                match cached {
                    Some(set) => {
                        template.set_descriptors(set);
                    }
                    None => {
                        let set = template.descriptors_or_extract(matcher).clone();
                        extracted.fetch_add(1, Ordering::Relaxed);
                        if let Some(c) = cache {
                            c.store_features(&template.id, &template.content_hash, set);
                        }
                    }
                }
            }
            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(cb) = progress {
                cb.on_progress(n, template.path.to_string_lossy().as_ref());
            }
        });

        if let Some(cb) = progress {
            cb.on_phase_end(PHASE_DESCRIPTORS);
        }
        let extracted = extracted.into_inner();
        log::debug!("Prepared descriptors for {} templates ({} extracted)", self.len(), extracted);
        extracted
    }
}

fn load_template(path: &Path, cache: &TemplateCache) -> Result<ReferenceTemplate, LoadFailure> {
    let fail = |error: String| LoadFailure {
        path: path.to_path_buf(),
        error,
    };
    let id = file_id(path);
    let bytes = read_bytes(path).map_err(|e| fail(e.to_string()))?;
    let pixels = decode_rgb(&bytes, path).map_err(|e| fail(e.to_string()))?;
    let lookup = cache
        .get_or_compute(&id, &bytes)
        .map_err(|e| fail(e.to_string()))?;

    Ok(ReferenceTemplate {
        id,
        path: path.to_path_buf(),
        pixels,
        content_hash: lookup.content_hash,
        histogram: lookup.histogram,
        cached_at: lookup.cached_at,
        fresh: lookup.fresh,
        luma: OnceLock::new(),
        descriptors: OnceLock::new(),
        color: OnceLock::new(),
    })
}

/// Image files found directly inside a directory.
#[derive(Debug, Clone, Default)]
pub struct ImageListing {
    /// Files with a supported extension, sorted by file name.
    pub images: Vec<PathBuf>,
    /// Image files in a format this build cannot decode.
    pub unsupported: Vec<PathBuf>,
}

impl ImageListing {
    /// One [`LoadFailure`] per unsupported file.
    #[must_use]
    pub fn unsupported_failures(&self) -> Vec<LoadFailure> {
        self.unsupported
            .iter()
            .map(|path| {
                log::warn!("Unsupported image format: {}", path.display());
                LoadFailure {
                    path: path.clone(),
                    error: "unsupported image format".to_string(),
                }
            })
            .collect()
    }
}

/// Image files directly inside `dir`, sorted by file name.
///
/// Files in a recognised but undecodable format land in
/// [`ImageListing::unsupported`]; anything else that is not an image is
/// ignored.
///
/// # Errors
///
/// Fails when `dir` is missing, not a directory, or unreadable.
pub fn list_images(dir: &Path) -> Result<ImageListing, CatalogError> {
    if !dir.exists() {
        return Err(CatalogError::NotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(CatalogError::NotADirectory(dir.to_path_buf()));
    }

    let mut listing = ImageListing::default();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            // The root itself failing is fatal; a single bad entry is not.
            Err(e) if e.depth() == 0 => {
                return Err(CatalogError::Io {
                    path: dir.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            log::trace!("Ignoring {}", entry.path().display());
        } else if is_supported_image(entry.path()) {
            listing.images.push(entry.into_path());
        } else if is_unsupported_image(entry.path()) {
            listing.unsupported.push(entry.into_path());
        } else {
            log::trace!("Ignoring {}", entry.path().display());
        }
    }
    Ok(listing)
}

/// Keep the first file per id; later files with the same stem are failures.
fn dedupe_ids(files: Vec<PathBuf>) -> (Vec<PathBuf>, Vec<LoadFailure>) {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(files.len());
    let mut failures = Vec::new();
    for path in files {
        let id = file_id(&path);
        if seen.insert(id.clone()) {
            kept.push(path);
        } else {
            log::warn!("Duplicate template id {} from {}", id, path.display());
            failures.push(LoadFailure {
                error: format!("duplicate template id {id}"),
                path,
            });
        }
    }
    (kept, failures)
}
