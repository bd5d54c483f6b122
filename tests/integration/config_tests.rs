use std::env;
use std::fs;

use equipmatch::config::{Config, ConfigError};
use equipmatch::matching::MatcherKind;
use tempfile::tempdir;

use super::common::env_lock;

struct EnvVar(&'static str);

impl EnvVar {
    fn set(key: &'static str, value: &str) -> Self {
        env::set_var(key, value);
        Self(key)
    }
}

impl Drop for EnvVar {
    fn drop(&mut self) {
        env::remove_var(self.0);
    }
}

#[test]
fn test_empty_file_yields_defaults() {
    let _env = env_lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    fs::write(&path, "").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_nested_env_overrides() {
    let _env = env_lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "threads = 2\n[mask]\nroi_radius = 50\n").unwrap();

    let _a = EnvVar::set("EQUIPMATCH_THREADS", "6");
    let _b = EnvVar::set("EQUIPMATCH_MATCHER", "descriptor");
    let _c = EnvVar::set("EQUIPMATCH_DESCRIPTOR__MIN_INLIERS", "9");

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.threads, 6);
    assert_eq!(config.matcher, MatcherKind::Descriptor);
    assert_eq!(config.descriptor.min_inliers, 9);
    assert_eq!(config.mask.roi_radius, 50);
}

#[test]
fn test_invalid_env_value_is_rejected() {
    let _env = env_lock();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "").unwrap();

    let _a = EnvVar::set("EQUIPMATCH_SCORING__PATTERN_WEIGHT", "0.9");
    assert!(matches!(Config::load(Some(&path)), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_malformed_toml_is_load_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[scoring\naccept_threshold = ").unwrap();
    assert!(matches!(Config::load_from_path(&path), Err(ConfigError::Load(_))));
}

#[test]
fn test_background_families_from_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[[mask.background_families]]
color = [10, 20, 30]
tolerance = [5, 5, 5]
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.mask.background_families.len(), 1);
    assert_eq!(config.mask.background_families[0].color, [10, 20, 30]);
}

#[test]
fn test_starter_config_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut config = Config::default();
    config.cache_dir = Some(dir.path().join("cache"));
    config.scoring.down_weighting.enabled = false;
    fs::write(&path, config.to_toml_string().unwrap()).unwrap();

    assert_eq!(Config::load_from_path(&path).unwrap(), config);
    assert_eq!(config.cache_dir_or_default().unwrap(), dir.path().join("cache"));
}
