use std::fs;
use std::path::Path;

use equipmatch::cache::entry::blob_file_name;
use equipmatch::cache::store::INDEX_FILE;
use equipmatch::cache::{CacheIndex, TemplateCache};
use equipmatch::imaging::{decode_rgb, PerceptualHistogram};
use tempfile::tempdir;

use super::common::{framed_icon, save_png};

fn seeded_cache(id: &str) -> (tempfile::TempDir, tempfile::TempDir, Vec<u8>) {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let bytes = fs::read(save_png(catalog.path(), id, &framed_icon(5))).unwrap();
    TemplateCache::open(cache_dir.path())
        .unwrap()
        .get_or_compute(id, &bytes)
        .unwrap();
    (catalog, cache_dir, bytes)
}

#[test]
fn test_garbage_index_starts_empty() {
    let (_catalog, cache_dir, bytes) = seeded_cache("axe");
    fs::write(cache_dir.path().join(INDEX_FILE), b"{ not json").unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    assert!(cache.is_empty());

    let lookup = cache.get_or_compute("axe", &bytes).unwrap();
    assert!(!lookup.fresh);
    assert_eq!(cache.len(), 1);

    // The rewritten index parses again.
    let text = fs::read_to_string(cache_dir.path().join(INDEX_FILE)).unwrap();
    let index: CacheIndex = serde_json::from_str(&text).unwrap();
    assert!(index.entries.contains_key("axe"));
}

#[test]
fn test_unknown_index_version_starts_empty() {
    let (_catalog, cache_dir, _) = seeded_cache("axe");
    let path = cache_dir.path().join(INDEX_FILE);
    let mut index: CacheIndex = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    index.version = 99;
    fs::write(&path, serde_json::to_vec(&index).unwrap()).unwrap();

    assert!(TemplateCache::open(cache_dir.path()).unwrap().is_empty());
}

#[test]
fn test_truncated_blob_is_recomputed() {
    let (_catalog, cache_dir, bytes) = seeded_cache("bow");
    let blob = cache_dir.path().join(blob_file_name("bow"));
    let full = fs::read(&blob).unwrap();
    fs::write(&blob, &full[..full.len() / 2]).unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let lookup = cache.get_or_compute("bow", &bytes).unwrap();
    assert!(!lookup.fresh);

    let expected = PerceptualHistogram::compute(&decode_rgb(&bytes, Path::new("bow.png")).unwrap());
    assert_eq!(lookup.histogram, expected);
    assert!(cache.get_or_compute("bow", &bytes).unwrap().fresh);
}

#[test]
fn test_missing_blob_is_recomputed() {
    let (_catalog, cache_dir, bytes) = seeded_cache("mace");
    fs::remove_file(cache_dir.path().join(blob_file_name("mace"))).unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    assert_eq!(cache.len(), 1);
    let lookup = cache.get_or_compute("mace", &bytes).unwrap();
    assert!(!lookup.fresh);
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_index_hash_mismatch_is_stale() {
    let (_catalog, cache_dir, bytes) = seeded_cache("staff");
    let path = cache_dir.path().join(INDEX_FILE);
    let mut index: CacheIndex = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    if let Some(entry) = index.entries.get_mut("staff") {
        entry.content_hash = "00".repeat(32);
    }
    fs::write(&path, serde_json::to_vec(&index).unwrap()).unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    assert!(!cache.get_or_compute("staff", &bytes).unwrap().fresh);
}

#[test]
fn test_blob_swapped_between_entries_is_rejected() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let a = fs::read(save_png(catalog.path(), "a", &framed_icon(1))).unwrap();
    let b = fs::read(save_png(catalog.path(), "b", &framed_icon(2))).unwrap();
    {
        let cache = TemplateCache::open(cache_dir.path()).unwrap();
        cache.get_or_compute("a", &a).unwrap();
        cache.get_or_compute("b", &b).unwrap();
    }

    // Blob of "b" stored under the name of "a": its embedded hash disagrees.
    fs::copy(
        cache_dir.path().join(blob_file_name("b")),
        cache_dir.path().join(blob_file_name("a")),
    )
    .unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let lookup = cache.get_or_compute("a", &a).unwrap();
    assert!(!lookup.fresh);
    let expected = PerceptualHistogram::compute(&decode_rgb(&a, Path::new("a.png")).unwrap());
    assert_eq!(lookup.histogram, expected);
}

#[test]
fn test_undecodable_bytes_are_an_error() {
    let cache_dir = tempdir().unwrap();
    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    assert!(cache.get_or_compute("junk", b"not an image").is_err());
    assert!(cache.is_empty());
}
