use std::fs;
use std::path::Path;

use equipmatch::cache::TemplateCache;
use equipmatch::catalog::{Catalog, ReferenceTemplate};
use equipmatch::error::ExitCode;
use equipmatch::imaging::{MaskConfig, ProbeIcon};
use equipmatch::matching::color::ColorVerifier;
use equipmatch::matching::pattern::match_pattern;
use equipmatch::matching::scorer::ScoringConfig;
use equipmatch::matching::{MatchEngine, MatchedBy, Matcher, PatternColorMatcher};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tempfile::tempdir;

use super::common::{framed_icon, save_jpeg, save_png, textured_icon, write_catalog};

#[test]
fn test_gray_square_matches_its_resized_copy() {
    let dir = tempdir().unwrap();
    let template = RgbImage::from_pixel(50, 50, Rgb([128, 128, 128]));
    let resized = image::imageops::resize(&template, 64, 64, FilterType::Triangle);
    let probe_path = save_png(dir.path(), "probe", &resized);
    let probe = ProbeIcon::load(&probe_path).unwrap();

    assert!(match_pattern(&probe.pixels, &template) >= 99.0);
    let color = ColorVerifier::default().verify(&probe.pixels, &template);
    assert!(color.similarity >= 0.95, "color {color:?}");

    let catalog = Catalog::from_templates(vec![ReferenceTemplate::from_image("gray", template)]);
    let result = PatternColorMatcher::default().match_probe(&probe, &catalog);
    let best = result.best.as_ref().unwrap();
    assert_eq!(best.template_id, "gray");
    assert!(best.composite_score >= 95.0);
    assert_eq!(result.matched_by, MatchedBy::PatternAndColor);
    assert!(result.accepted);
}

#[test]
fn test_catalog_round_trip_identifies_every_probe() {
    let catalog_dir = tempdir().unwrap();
    let probe_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    write_catalog(catalog_dir.path(), 5);
    for seed in [1, 3, 4] {
        fs::copy(
            catalog_dir.path().join(format!("item_{seed:02}.png")),
            probe_dir.path().join(format!("shot_{seed}.png")),
        )
        .unwrap();
    }

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let catalog = Catalog::load(catalog_dir.path(), &cache).unwrap();
    assert_eq!(catalog.len(), 5);

    let report = MatchEngine::new(Matcher::default())
        .match_directory(probe_dir.path(), &catalog, Some(&cache))
        .unwrap();

    let pairs: Vec<(&str, Option<&str>)> = report
        .results
        .iter()
        .map(|r| (r.probe_id.as_str(), r.best_template_id()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("shot_1", Some("item_01")),
            ("shot_3", Some("item_03")),
            ("shot_4", Some("item_04")),
        ]
    );
    for result in &report.results {
        assert!(result.accepted);
        assert_eq!(result.matched_by, MatchedBy::PatternAndColor);
        assert!(result.score() > 99.0);
    }
    assert_eq!(report.summary.accepted, 3);
    assert_eq!(report.summary.templates, 5);
}

#[test]
fn test_jpeg_probes_match_and_unknown_formats_are_failures() {
    let catalog_dir = tempdir().unwrap();
    let probe_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    write_catalog(catalog_dir.path(), 3);
    save_jpeg(probe_dir.path(), "crop", &framed_icon(2));
    fs::write(probe_dir.path().join("legacy.ico"), b"\0\0\x01\0").unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let catalog = Catalog::load(catalog_dir.path(), &cache).unwrap();
    let report = MatchEngine::new(Matcher::default())
        .match_directory(probe_dir.path(), &catalog, Some(&cache))
        .unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].probe_id, "crop");
    assert_eq!(report.results[0].best_template_id(), Some("item_02"));
    assert!(report.results[0].accepted);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, probe_dir.path().join("legacy.ico"));
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.exit_code(), ExitCode::PartialSuccess);
}

#[test]
fn test_jpeg_templates_load_into_the_catalog() {
    let catalog_dir = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    save_png(catalog_dir.path(), "item_00", &framed_icon(0));
    save_jpeg(catalog_dir.path(), "item_01", &framed_icon(1));
    fs::write(catalog_dir.path().join("item_02.avif"), b"not decodable here").unwrap();

    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    let catalog = Catalog::load(catalog_dir.path(), &cache).unwrap();
    let ids: Vec<&str> = catalog.templates().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["item_00", "item_01"]);
    assert_eq!(catalog.failures().len(), 1);
    assert_eq!(catalog.failures()[0].error, "unsupported image format");
}

#[test]
fn test_unrelated_probe_still_gets_best_effort_result() {
    let templates: Vec<ReferenceTemplate> = (0..3)
        .map(|i| ReferenceTemplate::from_image(format!("t{i}"), framed_icon(i)))
        .collect();
    let expected_scores: Vec<f64> = templates
        .iter()
        .map(|t| match_pattern(&framed_icon(77), &t.pixels))
        .collect();
    let catalog = Catalog::from_templates(templates);
    let probe = ProbeIcon::from_image(Path::new("stranger.png"), framed_icon(77));

    let result = PatternColorMatcher::default().match_probe(&probe, &catalog);
    let best = result.best.as_ref().unwrap();

    let max = expected_scores.iter().cloned().fold(f64::MIN, f64::max);
    assert!(max < 70.0, "fixture unexpectedly similar: {expected_scores:?}");
    assert_eq!(result.matched_by, MatchedBy::PatternOnly);
    assert_eq!(best.color_score, None);
    assert!((best.pattern_score - max).abs() < 1e-9);
    assert_eq!(best.composite_score, best.pattern_score);
    assert_eq!(result.accepted, best.composite_score >= 60.0);
}

#[test]
fn test_fallback_ties_go_to_smallest_id() {
    // Flat templates of the same brightness tie on pattern score.
    let flat = RgbImage::from_pixel(40, 40, Rgb([90, 160, 30]));
    let catalog = Catalog::from_templates(vec![
        ReferenceTemplate::from_image("zeta", flat.clone()),
        ReferenceTemplate::from_image("alpha", flat.clone()),
        ReferenceTemplate::from_image("mid", flat),
    ]);
    let probe = ProbeIcon::from_image(Path::new("p.png"), textured_icon(40, 2));

    let result = PatternColorMatcher::default().match_probe(&probe, &catalog);
    assert_eq!(result.best_template_id(), Some("alpha"));
    assert_eq!(result.score(), 0.0);
    assert!(!result.accepted);
}

#[test]
fn test_matching_is_deterministic() {
    let catalog = Catalog::from_templates(
        (0..4)
            .map(|i| ReferenceTemplate::from_image(format!("t{i}"), framed_icon(i)))
            .collect(),
    );
    let probe = ProbeIcon::from_image(Path::new("p.png"), framed_icon(2));
    let matcher = PatternColorMatcher::default().with_diagnostics(true);

    let first = matcher.match_probe(&probe, &catalog);
    for _ in 0..3 {
        let again = matcher.match_probe(&probe, &catalog);
        assert_eq!(again.best, first.best);
        assert_eq!(again.candidates, first.candidates);
    }
}

#[test]
fn test_diagnostics_list_every_template() {
    let catalog = Catalog::from_templates(
        (0..4)
            .map(|i| ReferenceTemplate::from_image(format!("t{i}"), framed_icon(i)))
            .collect(),
    );
    let probe = ProbeIcon::from_image(Path::new("p.png"), framed_icon(1));

    let plain = PatternColorMatcher::default().match_probe(&probe, &catalog);
    assert!(plain.candidates.is_empty());

    let result = PatternColorMatcher::default()
        .with_diagnostics(true)
        .match_probe(&probe, &catalog);
    assert_eq!(result.candidates.len(), 4);
    assert_eq!(result.candidates[0].template_id, "t1");
    assert!(result.candidates[0].color_score.is_some());
    assert!(result
        .candidates
        .iter()
        .all(|c| c.histogram_similarity.is_some()));
    assert_eq!(result.candidates[0], *result.best.as_ref().unwrap());
}

#[test]
fn test_raised_accept_threshold_rejects() {
    let catalog = Catalog::from_templates(vec![ReferenceTemplate::from_image("t0", framed_icon(0))]);
    let probe = ProbeIcon::from_image(Path::new("p.png"), framed_icon(0));
    let strict = ScoringConfig {
        accept_threshold: 100.0,
        pattern_threshold: 100.0,
        ..ScoringConfig::default()
    };

    let result = PatternColorMatcher::new(strict, MaskConfig::default()).match_probe(&probe, &catalog);
    assert_eq!(result.best_template_id(), Some("t0"));
    assert!(result.score() <= 100.0);
    assert_eq!(result.accepted, result.score() >= 100.0);
}

#[test]
fn test_empty_catalog_has_no_best() {
    let probe = ProbeIcon::from_image(Path::new("p.png"), framed_icon(0));
    let result = PatternColorMatcher::default().match_probe(&probe, &Catalog::default());
    assert!(result.best.is_none());
    assert!(!result.accepted);
}
