use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use equipmatch::cache::TemplateCache;
use equipmatch::imaging::{decode_rgb, PerceptualHistogram};
use rayon::prelude::*;
use tempfile::tempdir;

use super::common::{framed_icon, save_png};

#[test]
fn test_cached_histogram_equals_direct_computation() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let path = save_png(catalog.path(), "helm", &framed_icon(3));
    let bytes = fs::read(&path).unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let first = cache.get_or_compute("helm", &bytes).unwrap();
    let second = cache.get_or_compute("helm", &bytes).unwrap();

    let direct = PerceptualHistogram::compute(&decode_rgb(&bytes, &path).unwrap());
    assert!(!first.fresh);
    assert!(second.fresh);
    assert_eq!(first.histogram, direct);
    assert_eq!(second.histogram, direct);
    assert_eq!(first.content_hash, second.content_hash);
}

#[test]
fn test_replaced_file_is_stale_and_recomputed() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache = TemplateCache::open(cache_dir.path()).unwrap();

    let path = save_png(catalog.path(), "ring", &framed_icon(1));
    let before = cache.get_or_compute("ring", &fs::read(&path).unwrap()).unwrap();

    save_png(catalog.path(), "ring", &framed_icon(2));
    let after = cache.get_or_compute("ring", &fs::read(&path).unwrap()).unwrap();

    assert!(!after.fresh);
    assert_ne!(after.histogram, before.histogram);
    assert_ne!(after.content_hash, before.content_hash);
    assert_eq!(cache.len(), 1);

    // The recomputed entry is now the valid one.
    let again = cache.get_or_compute("ring", &fs::read(&path).unwrap()).unwrap();
    assert!(again.fresh);
    assert_eq!(again.histogram, after.histogram);
}

#[test]
fn test_cache_survives_reopen() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let bytes = fs::read(save_png(catalog.path(), "boots", &framed_icon(9))).unwrap();

    {
        let cache = TemplateCache::open(cache_dir.path()).unwrap();
        cache.get_or_compute("boots", &bytes).unwrap();
    }

    let reopened = TemplateCache::open(cache_dir.path()).unwrap();
    assert_eq!(reopened.template_ids(), vec!["boots".to_string()]);
    let lookup = reopened.get_or_compute("boots", &bytes).unwrap();
    assert!(lookup.fresh);
    assert_eq!(reopened.stats().hits, 1);
    assert_eq!(reopened.stats().misses, 0);
}

#[test]
fn test_concurrent_lookups_agree() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let bytes = fs::read(save_png(catalog.path(), "shield", &framed_icon(4))).unwrap();
    let cache = Arc::new(TemplateCache::open(cache_dir.path()).unwrap());

    let lookups: Vec<_> = (0..16)
        .into_par_iter()
        .map(|_| cache.get_or_compute("shield", &bytes).unwrap())
        .collect();

    let expected = &lookups[0].histogram;
    assert!(lookups.iter().all(|l| &l.histogram == expected));
    assert!(lookups.iter().any(|l| !l.fresh));
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_prune_and_info() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    for (seed, id) in ["a", "b", "c"].iter().enumerate() {
        let bytes = fs::read(save_png(catalog.path(), id, &framed_icon(seed as u64))).unwrap();
        cache.get_or_compute(id, &bytes).unwrap();
    }

    let info = cache.info();
    assert_eq!(info.entries, 3);
    assert!(info.blob_bytes > 0);

    let keep: HashSet<String> = ["a".to_string()].into_iter().collect();
    assert_eq!(cache.prune(&keep), 2);
    assert_eq!(cache.template_ids(), vec!["a".to_string()]);
    assert_eq!(cache.clear(), 1);
    assert!(cache.is_empty());
}
