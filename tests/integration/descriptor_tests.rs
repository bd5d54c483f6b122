use std::path::Path;

use equipmatch::cache::TemplateCache;
use equipmatch::catalog::{CacheBuilder, Catalog, ReferenceTemplate};
use equipmatch::imaging::ProbeIcon;
use equipmatch::matching::descriptor::{
    AttemptStage, DescriptorConfig, DescriptorMatcher, DescriptorOutcome,
};
use equipmatch::matching::{DescriptorGeometricMatcher, MatchEngine, MatchedBy, Matcher};
use image::{Rgb, RgbImage};
use tempfile::tempdir;

use super::common::{save_png, textured_icon};

fn textured_catalog() -> Catalog {
    Catalog::from_templates(
        [5, 11, 21]
            .into_iter()
            .map(|seed| ReferenceTemplate::from_image(format!("t{seed:02}"), textured_icon(116, seed)))
            .collect(),
    )
}

#[test]
fn test_identical_icon_is_verified() {
    let catalog = textured_catalog();
    let probe = ProbeIcon::from_image(Path::new("probe.png"), textured_icon(116, 21));

    let result = DescriptorGeometricMatcher::default().match_probe(&probe, &catalog);
    assert_eq!(result.matched_by, MatchedBy::DescriptorGeometric);
    assert_eq!(result.best_template_id(), Some("t21"));
    assert!(result.accepted);
    assert!(!result.low_confidence);

    let evidence = result.descriptor.as_ref().unwrap();
    assert!(evidence.outcome.is_verified());
    assert!(evidence.confidence >= 60.0);
    assert_eq!(result.score(), evidence.confidence);
    assert_eq!(result.best.as_ref().unwrap().pattern_score, 0.0);
}

#[test]
fn test_uniform_probe_fails_with_zero_confidence() {
    let catalog = textured_catalog();
    let probe = ProbeIcon::from_image(
        Path::new("flat.png"),
        RgbImage::from_pixel(116, 116, Rgb([200, 60, 60])),
    );

    let result = DescriptorGeometricMatcher::default()
        .with_diagnostics(true)
        .match_probe(&probe, &catalog);

    assert!(!result.accepted);
    assert!(result.low_confidence);
    assert_eq!(result.score(), 0.0);
    // Every attempt fails, so the reported best is the first template.
    assert_eq!(result.best_template_id(), Some("t05"));
    assert_eq!(result.candidates.len(), 3);
    assert!(result.candidates.iter().all(|c| c.composite_score == 0.0));

    match &result.descriptor.as_ref().unwrap().outcome {
        DescriptorOutcome::Failed(reason) => assert_eq!(reason.stage(), AttemptStage::Extract),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn test_stricter_inlier_requirement_blocks_verification() {
    let icon = textured_icon(116, 21);
    let strict = DescriptorMatcher::new(DescriptorConfig {
        min_inliers: 10_000,
        ..DescriptorConfig::default()
    });

    let evidence = strict.match_images(&icon, &icon);
    assert!(!evidence.outcome.is_verified());
    assert!(!evidence.is_valid_match);
    assert_eq!(evidence.confidence, 0.0);
}

#[test]
fn test_built_descriptors_are_reused_from_cache() {
    let catalog_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    for seed in [5, 21] {
        save_png(catalog_dir.path(), &format!("t{seed:02}"), &textured_icon(116, seed));
    }
    let cache = TemplateCache::open(cache_dir.path()).unwrap();

    let summary = CacheBuilder::new()
        .with_descriptors(true, DescriptorConfig::default())
        .build(catalog_dir.path(), &cache)
        .unwrap();
    assert_eq!(summary.descriptors_computed, 2);
    assert_eq!(cache.info().entries_with_descriptors, 2);

    let matcher = DescriptorMatcher::default();
    let catalog = Catalog::load(catalog_dir.path(), &cache).unwrap();
    assert_eq!(catalog.prepare_descriptors(Some(&cache), &matcher, None), 0);

    let template = catalog.get("t21").unwrap();
    assert_eq!(template.descriptors(), Some(&matcher.extract(&template.pixels)));
}

#[test]
fn test_descriptor_engine_run_writes_features_back() {
    let catalog_dir = tempdir().unwrap();
    let probe_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    save_png(catalog_dir.path(), "t21", &textured_icon(116, 21));
    save_png(catalog_dir.path(), "t05", &textured_icon(116, 5));
    save_png(probe_dir.path(), "shot", &textured_icon(116, 21));

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let catalog = Catalog::load(catalog_dir.path(), &cache).unwrap();
    assert_eq!(cache.info().entries_with_descriptors, 0);

    let matcher = Matcher::Descriptor(DescriptorGeometricMatcher::default());
    let report = MatchEngine::new(matcher)
        .match_directory(probe_dir.path(), &catalog, Some(&cache))
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].best_template_id(), Some("t21"));
    assert!(report.results[0].accepted);
    assert_eq!(cache.info().entries_with_descriptors, 2);
}
