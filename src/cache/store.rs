//! The template cache: index + blobs in one directory.
//!
//! All operations take `&self`; the index sits behind a lock so a cache can
//! be shared across rayon workers. Every write is durable before the call
//! returns (temp file, fsync, rename). I/O failures after [`TemplateCache::open`]
//! degrade to misses and warnings, never to errors: the cache is an
//! optimization, not a correctness dependency.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::entry::{
    blob_file_name, content_hash, hash_hex, CacheBlob, CacheIndex, ContentHash, IndexEntry,
    INDEX_VERSION,
};
use crate::imaging::{decode_rgb, ImageLoadError, PerceptualHistogram};
use crate::matching::descriptor::DescriptorSet;

/// Name of the index file inside the cache directory.
pub const INDEX_FILE: &str = "index.json";

const WRITE_PROBE_FILE: &str = ".write-probe";

/// Errors surfaced by the cache.
///
/// Only opening the cache and decoding the presented image can fail; disk
/// trouble during normal operation is logged and absorbed.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache directory cannot be created or written to.
    #[error("Cache directory {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No platform cache directory could be determined.
    #[error("Could not determine a default cache directory; pass one explicitly")]
    NoDefaultDirectory,

    /// The template bytes could not be decoded, so nothing could be computed.
    #[error(transparent)]
    Image(#[from] ImageLoadError),
}

/// Result of [`TemplateCache::get_or_compute`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    /// The template's perceptual histogram.
    pub histogram: PerceptualHistogram,
    /// True when served from a valid cache entry, false when recomputed.
    pub fresh: bool,
    /// Hash of the bytes that were presented.
    pub content_hash: ContentHash,
    /// When the served data was computed.
    pub cached_at: DateTime<Utc>,
}

/// Hit/miss counters since the cache was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from disk.
    pub hits: usize,
    /// Lookups that recomputed.
    pub misses: usize,
    /// Blobs or index writes that failed.
    pub write_failures: usize,
}

/// Summary for `cache-info`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    /// Cache directory.
    pub directory: PathBuf,
    /// Number of indexed templates.
    pub entries: usize,
    /// Entries whose blob carries descriptors.
    pub entries_with_descriptors: usize,
    /// Total size of indexed blobs in bytes.
    pub blob_bytes: u64,
    /// Last index update.
    pub updated_at: DateTime<Utc>,
}

/// Persistent content-hash keyed template cache.
pub struct TemplateCache {
    dir: PathBuf,
    index: RwLock<CacheIndex>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    write_failures: AtomicUsize,
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("dir", &self.dir)
            .field("entries", &self.len())
            .finish()
    }
}

impl TemplateCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotWritable`] when the directory cannot be
    /// created or a probe file cannot be written into it. An unreadable index
    /// is not an error; the cache starts empty.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        let not_writable = |source| CacheError::NotWritable {
            path: dir.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(not_writable)?;
        let probe = dir.join(WRITE_PROBE_FILE);
        File::create(&probe)
            .and_then(|mut f| f.write_all(b"ok"))
            .map_err(not_writable)?;
        let _ = fs::remove_file(&probe);

        let index = load_index(&dir.join(INDEX_FILE));
        log::debug!(
            "Opened template cache at {} with {} entries",
            dir.display(),
            index.entries.len()
        );

        Ok(Self {
            dir,
            index: RwLock::new(index),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            write_failures: AtomicUsize::new(0),
        })
    }

    /// Platform cache directory (`~/.cache/equipmatch` on Linux).
    pub fn default_dir() -> Result<PathBuf, CacheError> {
        ProjectDirs::from("com", "equipmatch", "equipmatch")
            .map(|dirs| dirs.cache_dir().join("templates"))
            .ok_or(CacheError::NoDefaultDirectory)
    }

    /// The cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of indexed templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_index().entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids currently in the index, sorted.
    #[must_use]
    pub fn template_ids(&self) -> Vec<String> {
        self.read_index().entries.keys().cloned().collect()
    }

    /// Counters since open.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Serve the histogram for `template_id` or recompute it from `image_bytes`.
    ///
    /// `fresh` is true only when the index entry hash equals the hash of
    /// `image_bytes` and the blob decodes. On recompute the blob and the index
    /// are written before returning.
    ///
    /// # Errors
    ///
    /// Fails only when recomputation is needed and `image_bytes` is not a
    /// decodable image.
    pub fn get_or_compute(
        &self,
        template_id: &str,
        image_bytes: &[u8],
    ) -> Result<CacheLookup, CacheError> {
        let hash = content_hash(image_bytes);

        if let Some((blob, cached_at)) = self.load_fresh_blob(template_id, &hash) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("Cache hit for template {}", template_id);
            return Ok(CacheLookup {
                histogram: blob.histogram,
                fresh: true,
                content_hash: hash,
                cached_at,
            });
        }

        // Concurrent callers for the same id wait here instead of recomputing twice.
        let slot = self.in_flight_slot(template_id);
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match self.load_fresh_blob(template_id, &hash) {
                Some((blob, cached_at)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Ok(CacheLookup {
                        histogram: blob.histogram,
                        fresh: true,
                        content_hash: hash,
                        cached_at,
                    })
                }
                None => self.recompute(template_id, image_bytes, hash),
            }
        };
        self.release_in_flight(template_id);
        result
    }

    fn recompute(
        &self,
        template_id: &str,
        image_bytes: &[u8],
        hash: ContentHash,
    ) -> Result<CacheLookup, CacheError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::trace!("Cache miss for template {}, recomputing", template_id);

        let pixels = decode_rgb(image_bytes, Path::new(template_id))?;
        let histogram = PerceptualHistogram::compute(&pixels);
        let blob = CacheBlob::new(hash, histogram.clone());
        let cached_at = Utc::now();
        self.persist(template_id, &blob, cached_at);

        Ok(CacheLookup {
            histogram,
            fresh: false,
            content_hash: hash,
            cached_at,
        })
    }

    /// Remove the index entry and blob for `template_id`.
    ///
    /// Returns whether an entry existed.
    pub fn invalidate(&self, template_id: &str) -> bool {
        let removed = {
            let mut index = self.write_index();
            let removed = index.entries.remove(template_id);
            if removed.is_some() {
                index.updated_at = Utc::now();
                self.write_index_file(&index);
            }
            removed
        };

        match removed {
            Some(entry) => {
                self.remove_blob(&entry.blob);
                log::debug!("Invalidated cache entry for {}", template_id);
                true
            }
            None => false,
        }
    }

    /// Drop every entry. Returns the number removed.
    pub fn clear(&self) -> usize {
        let entries = {
            let mut index = self.write_index();
            let entries = std::mem::take(&mut index.entries);
            index.updated_at = Utc::now();
            self.write_index_file(&index);
            entries
        };
        for entry in entries.values() {
            self.remove_blob(&entry.blob);
        }
        log::info!("Cleared {} cache entries", entries.len());
        entries.len()
    }

    /// Drop entries whose id is not in `keep`. Returns the number removed.
    pub fn prune(&self, keep: &HashSet<String>) -> usize {
        let removed: Vec<IndexEntry> = {
            let mut index = self.write_index();
            let stale: Vec<String> = index
                .entries
                .keys()
                .filter(|id| !keep.contains(*id))
                .cloned()
                .collect();
            let removed: Vec<IndexEntry> = stale
                .iter()
                .filter_map(|id| index.entries.remove(id))
                .collect();
            if !removed.is_empty() {
                index.updated_at = Utc::now();
                self.write_index_file(&index);
            }
            removed
        };
        for entry in &removed {
            self.remove_blob(&entry.blob);
        }
        if !removed.is_empty() {
            log::debug!("Pruned {} cache entries for removed templates", removed.len());
        }
        removed.len()
    }

    /// Descriptor set cached for `template_id`, if one was stored.
    ///
    /// This does not check freshness against the current file; callers that
    /// hold the bytes should use [`TemplateCache::get_fresh_features`].
    #[must_use]
    pub fn get_cached_features(&self, template_id: &str) -> Option<DescriptorSet> {
        let blob_name = {
            let index = self.read_index();
            let entry = index.entries.get(template_id)?;
            if !entry.has_descriptors {
                return None;
            }
            entry.blob.clone()
        };
        self.read_blob(&blob_name).and_then(|blob| blob.descriptors)
    }

    /// Descriptor set for `template_id`, only if computed from bytes with `hash`.
    #[must_use]
    pub fn get_fresh_features(&self, template_id: &str, hash: &ContentHash) -> Option<DescriptorSet> {
        self.load_fresh_blob(template_id, hash)
            .and_then(|(blob, _)| blob.descriptors)
    }

    /// Attach a descriptor set to the blob of `template_id`.
    ///
    /// Only stored when the existing entry was computed from bytes with
    /// `hash`; returns whether the set was persisted.
    pub fn store_features(
        &self,
        template_id: &str,
        hash: &ContentHash,
        descriptors: DescriptorSet,
    ) -> bool {
        // Shares the slot with get_or_compute so the blob is not rewritten underneath it.
        let slot = self.in_flight_slot(template_id);
        let stored = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match self.load_fresh_blob(template_id, hash) {
                Some((mut blob, cached_at)) => {
                    blob.descriptors = Some(descriptors);
                    self.persist(template_id, &blob, cached_at)
                }
                None => {
                    log::debug!(
                        "Not storing descriptors for {}: no fresh cache entry",
                        template_id
                    );
                    false
                }
            }
        };
        self.release_in_flight(template_id);
        stored
    }

    /// Summary of the cache contents.
    #[must_use]
    pub fn info(&self) -> CacheInfo {
        let index = self.read_index();
        let blob_bytes = index
            .entries
            .values()
            .filter_map(|e| fs::metadata(self.dir.join(&e.blob)).ok())
            .map(|m| m.len())
            .sum();
        CacheInfo {
            directory: self.dir.clone(),
            entries: index.entries.len(),
            entries_with_descriptors: index.entries.values().filter(|e| e.has_descriptors).count(),
            blob_bytes,
            updated_at: index.updated_at,
        }
    }

    fn load_fresh_blob(
        &self,
        template_id: &str,
        hash: &ContentHash,
    ) -> Option<(CacheBlob, DateTime<Utc>)> {
        let (blob_name, cached_at) = {
            let index = self.read_index();
            let entry = index.entries.get(template_id)?;
            if !entry.matches(hash) {
                log::trace!("Cache entry for {} is stale", template_id);
                return None;
            }
            (entry.blob.clone(), entry.cached_at)
        };

        let blob = self.read_blob(&blob_name)?;
        if blob.content_hash != *hash {
            log::warn!(
                "Cache blob for {} disagrees with the index; recomputing",
                template_id
            );
            return None;
        }
        Some((blob, cached_at))
    }

    fn read_blob(&self, blob_name: &str) -> Option<CacheBlob> {
        let path = self.dir.join(blob_name);
        match fs::read(&path) {
            Ok(bytes) => {
                let blob = CacheBlob::decode(&bytes);
                if blob.is_none() {
                    log::warn!("Cache blob {} is corrupt; treating as absent", path.display());
                }
                blob
            }
            Err(e) => {
                log::warn!("Cache blob {} unreadable: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the blob, then the index. Returns whether both landed on disk.
    fn persist(&self, template_id: &str, blob: &CacheBlob, cached_at: DateTime<Utc>) -> bool {
        let blob_name = blob_file_name(template_id);
        let encoded = match blob.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to encode cache blob for {}: {}", template_id, e);
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        if let Err(e) = write_durable(&self.dir.join(&blob_name), &encoded) {
            log::warn!("Failed to write cache blob for {}: {}", template_id, e);
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let mut index = self.write_index();
        index.entries.insert(
            template_id.to_string(),
            IndexEntry {
                content_hash: hash_hex(&blob.content_hash),
                blob: blob_name,
                cached_at,
                has_descriptors: blob.descriptors.is_some(),
            },
        );
        index.updated_at = Utc::now();
        self.write_index_file(&index)
    }

    fn write_index_file(&self, index: &CacheIndex) -> bool {
        let result = serde_json::to_vec_pretty(index)
            .map_err(std::io::Error::other)
            .and_then(|json| write_durable(&self.dir.join(INDEX_FILE), &json));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to write cache index: {}", e);
                self.write_failures.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn remove_blob(&self, blob_name: &str) {
        let path = self.dir.join(blob_name);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove cache blob {}: {}", path.display(), e);
            }
        }
    }

    fn in_flight_slot(&self, template_id: &str) -> Arc<Mutex<()>> {
        let mut slots = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(template_id.to_string()).or_default())
    }

    fn release_in_flight(&self, template_id: &str) {
        let mut slots = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(template_id) {
            // Only the map and the current holder reference it: nobody else is waiting.
            if Arc::strong_count(slot) <= 2 {
                slots.remove(template_id);
            }
        }
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, CacheIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> std::sync::RwLockWriteGuard<'_, CacheIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_index(path: &Path) -> CacheIndex {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return CacheIndex::default(),
        Err(e) => {
            log::warn!("Cache index {} unreadable ({}); starting empty", path.display(), e);
            return CacheIndex::default();
        }
    };
    match serde_json::from_slice::<CacheIndex>(&bytes) {
        Ok(index) if index.version == INDEX_VERSION => index,
        Ok(index) => {
            log::warn!(
                "Cache index version {} is not supported; starting empty",
                index.version
            );
            CacheIndex::default()
        }
        Err(e) => {
            log::warn!("Cache index {} is corrupt ({}); starting empty", path.display(), e);
            CacheIndex::default()
        }
    }
}

/// Write `bytes` to `path` via a uniquely named, synced temp file in the same
/// directory and an atomic rename.
fn write_durable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
