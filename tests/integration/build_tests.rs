use std::fs;

use clap::Parser;
use equipmatch::cache::TemplateCache;
use equipmatch::catalog::CacheBuilder;
use equipmatch::cli::Cli;
use equipmatch::error::ExitCode;
use equipmatch::run_app;
use tempfile::tempdir;

use super::common::{env_lock, framed_icon, save_png, write_catalog};

fn run(args: &[&str]) -> anyhow::Result<ExitCode> {
    let mut argv = vec!["equipmatch", "-q"];
    argv.extend_from_slice(args);
    run_app(Cli::try_parse_from(argv).unwrap())
}

#[test]
fn test_build_then_rebuild_is_all_fresh() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    write_catalog(catalog.path(), 4);
    let cache = TemplateCache::open(cache_dir.path()).unwrap();

    let first = CacheBuilder::new().build(catalog.path(), &cache).unwrap();
    assert_eq!(first.processed, 4);
    assert_eq!(first.recomputed, 4);
    assert_eq!(first.fresh, 0);

    let second = CacheBuilder::new().build(catalog.path(), &cache).unwrap();
    assert_eq!(second.fresh, 4);
    assert_eq!(second.recomputed, 0);
    assert!(second.is_complete());
}

#[test]
fn test_edited_and_removed_files_are_tracked() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    let paths = write_catalog(catalog.path(), 3);
    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    CacheBuilder::new().build(catalog.path(), &cache).unwrap();

    save_png(catalog.path(), "item_00", &framed_icon(40));
    fs::remove_file(&paths[2]).unwrap();

    let summary = CacheBuilder::new().build(catalog.path(), &cache).unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.fresh, 1);
    assert_eq!(summary.recomputed, 1);
    assert_eq!(summary.pruned, 1);
    assert_eq!(
        cache.template_ids(),
        vec!["item_00".to_string(), "item_01".to_string()]
    );
}

#[test]
fn test_cli_build_info_and_clear() {
    let _env = env_lock();
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    write_catalog(catalog.path(), 2);
    let cache_arg = cache_dir.path().to_str().unwrap();
    let catalog_arg = catalog.path().to_str().unwrap();

    let code = run(&["--cache", cache_arg, "build-cache", catalog_arg, "--with-descriptors"]).unwrap();
    assert_eq!(code, ExitCode::Success);
    {
        let cache = TemplateCache::open(cache_dir.path()).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.info().entries_with_descriptors, 2);
    }

    assert_eq!(run(&["--cache", cache_arg, "cache-info"]).unwrap(), ExitCode::Success);
    assert_eq!(run(&["--cache", cache_arg, "clear-cache"]).unwrap(), ExitCode::Success);
    assert!(TemplateCache::open(cache_dir.path()).unwrap().is_empty());
}

#[test]
fn test_cli_build_with_broken_file_is_partial() {
    let _env = env_lock();
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    write_catalog(catalog.path(), 2);
    fs::write(catalog.path().join("broken.png"), b"\x89PNG truncated").unwrap();

    let code = run(&[
        "--cache",
        cache_dir.path().to_str().unwrap(),
        "build-cache",
        catalog.path().to_str().unwrap(),
    ])
    .unwrap();
    assert_eq!(code, ExitCode::PartialSuccess);
    assert_eq!(TemplateCache::open(cache_dir.path()).unwrap().len(), 2);
}

#[test]
fn test_cli_build_missing_catalog_is_error() {
    let _env = env_lock();
    let root = tempdir().unwrap();
    let result = run(&[
        "--cache",
        root.path().join("cache").to_str().unwrap(),
        "build-cache",
        root.path().join("missing").to_str().unwrap(),
    ]);
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("missing"));
}

#[test]
fn test_force_rebuild_recomputes() {
    let catalog = tempdir().unwrap();
    let cache_dir = tempdir().unwrap();
    write_catalog(catalog.path(), 2);
    let cache = TemplateCache::open(cache_dir.path()).unwrap();
    CacheBuilder::new().build(catalog.path(), &cache).unwrap();

    let summary = CacheBuilder::new()
        .with_force(true)
        .build(catalog.path(), &cache)
        .unwrap();
    assert_eq!(summary.recomputed, 2);
    assert_eq!(summary.fresh, 0);
}
