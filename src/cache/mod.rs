//! Persistent template feature cache.
//!
//! Per reference image the cache keeps a content hash, a perceptual
//! histogram and, once computed, a descriptor set, so repeated runs over the
//! same catalog skip the expensive per-template work.
//!
//! # Layout
//!
//! * [`entry`]: the on-disk records (JSON index, bincode blobs) and content hashing.
//! * [`store`]: [`TemplateCache`], the read/compute/persist logic.
//!
//! # Freshness
//!
//! The index maps each template id to the BLAKE3 hash of the file bytes the
//! blob was computed from. An entry is fresh only when that hash equals the
//! hash of the bytes presented now and the blob decodes cleanly. Anything
//! else (changed file, missing blob, truncated blob, schema change) is a
//! miss and triggers synchronous recomputation.

pub mod entry;
pub mod store;

pub use entry::{content_hash, hash_hex, CacheBlob, CacheIndex, ContentHash, IndexEntry};
pub use store::{CacheError, CacheInfo, CacheLookup, CacheStats, TemplateCache};
