//! On-disk cache records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::imaging::PerceptualHistogram;
use crate::matching::descriptor::DescriptorSet;

/// Bumped whenever [`CacheBlob`] or the histogram layout changes.
pub const BLOB_SCHEMA_VERSION: u32 = 1;

/// Bumped whenever [`CacheIndex`] changes shape.
pub const INDEX_VERSION: u32 = 1;

/// BLAKE3 digest of a file's raw bytes.
pub type ContentHash = [u8; 32];

/// Hash raw file bytes.
#[must_use]
pub fn content_hash(bytes: &[u8]) -> ContentHash {
    *blake3::hash(bytes).as_bytes()
}

/// Lowercase hex rendering of a content hash.
#[must_use]
pub fn hash_hex(hash: &ContentHash) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// One template's row in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Hex content hash the blob was computed from.
    pub content_hash: String,
    /// Blob file name, relative to the cache directory.
    pub blob: String,
    /// When the blob was last written.
    pub cached_at: DateTime<Utc>,
    /// Whether the blob carries a descriptor set.
    #[serde(default)]
    pub has_descriptors: bool,
}

impl IndexEntry {
    /// Whether this entry was computed from bytes with `hash`.
    #[must_use]
    pub fn matches(&self, hash: &ContentHash) -> bool {
        self.content_hash == hash_hex(hash)
    }
}

/// The cache index: the single source of truth for freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheIndex {
    /// Index format version.
    pub version: u32,
    /// Last time any entry changed.
    pub updated_at: DateTime<Utc>,
    /// Entries keyed by template id.
    pub entries: BTreeMap<String, IndexEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

/// Per-template payload, bincode-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheBlob {
    /// Must equal [`BLOB_SCHEMA_VERSION`] to be trusted.
    pub schema_version: u32,
    /// Hash of the bytes the payload was derived from.
    pub content_hash: ContentHash,
    /// Perceptual L*a*b* histogram.
    pub histogram: PerceptualHistogram,
    /// Keypoints and binary descriptors, once extracted.
    pub descriptors: Option<DescriptorSet>,
}

impl CacheBlob {
    /// Build a blob for freshly computed data.
    #[must_use]
    pub fn new(content_hash: ContentHash, histogram: PerceptualHistogram) -> Self {
        Self {
            schema_version: BLOB_SCHEMA_VERSION,
            content_hash,
            histogram,
            descriptors: None,
        }
    }

    /// Encode for disk.
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from disk, rejecting other schema versions.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bincode::deserialize::<Self>(bytes) {
            Ok(blob) if blob.schema_version == BLOB_SCHEMA_VERSION => Some(blob),
            Ok(blob) => {
                log::debug!(
                    "Ignoring cache blob with schema version {} (expected {})",
                    blob.schema_version,
                    BLOB_SCHEMA_VERSION
                );
                None
            }
            Err(e) => {
                log::debug!("Ignoring undecodable cache blob: {}", e);
                None
            }
        }
    }
}

/// Blob file name for a template id.
///
/// Ids are arbitrary file stems, so the name is derived from their hash.
#[must_use]
pub fn blob_file_name(template_id: &str) -> String {
    let digest = blake3::hash(template_id.as_bytes());
    format!("{}.bin", &digest.to_hex()[..32])
}
