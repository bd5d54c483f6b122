//! Layered engine configuration.
//!
//! Values resolve in this order, later layers winning:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. a TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. `EQUIPMATCH_*` environment variables, `__` separating nested keys
//!    (`EQUIPMATCH_SCORING__ACCEPT_THRESHOLD=55`)
//! 4. CLI flags, applied by the caller after loading

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheError, TemplateCache};
use crate::imaging::MaskConfig;
use crate::matching::descriptor::DescriptorConfig;
use crate::matching::scorer::ScoringConfig;
use crate::matching::MatcherKind;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "EQUIPMATCH_";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be parsed or has the wrong shape.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// The merged values are out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache directory; the platform cache dir when unset.
    pub cache_dir: Option<PathBuf>,
    /// Worker threads for matching; 0 lets rayon decide.
    pub threads: usize,
    /// Strategy used by `match` when `--matcher` is not given.
    pub matcher: MatcherKind,
    pub mask: MaskConfig,
    pub scoring: ScoringConfig,
    pub descriptor: DescriptorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            threads: 0,
            matcher: MatcherKind::default(),
            mask: MaskConfig::default(),
            scoring: ScoringConfig::default(),
            descriptor: DescriptorConfig::default(),
        }
    }
}

impl Config {
    /// Load defaults, the config file and the environment.
    ///
    /// With `path` unset, the default config file is used if it exists.
    ///
    /// # Errors
    ///
    /// Fails when a layer does not parse or the result does not validate.
    /// An explicit `path` that does not exist is also an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) if !p.exists() => {
                return Err(ConfigError::Invalid(format!(
                    "config file {} does not exist",
                    p.display()
                )))
            }
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = &file {
            log::debug!("Loading configuration from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Load only defaults and the TOML file at `path`, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Fails when the file does not parse or does not validate.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// `config.toml` in the platform config directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "equipmatch", "equipmatch").map(|d| d.config_dir().join("config.toml"))
    }

    /// Render as TOML, suitable for writing a starter config file.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// The configured cache directory, or the platform default.
    ///
    /// # Errors
    ///
    /// Fails when no directory is configured and none can be determined.
    pub fn cache_dir_or_default(&self) -> Result<PathBuf, CacheError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => TemplateCache::default_dir(),
        }
    }

    /// Check ranges the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        let s = &self.scoring;

        for (name, value) in [
            ("scoring.pattern_threshold", s.pattern_threshold),
            ("scoring.accept_threshold", s.accept_threshold),
            ("scoring.down_weighting.pattern_floor", s.down_weighting.pattern_floor),
            ("descriptor.valid_confidence", self.descriptor.valid_confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return invalid(format!("{name} must be within 0..=100, got {value}"));
            }
        }
        for (name, value) in [
            ("scoring.pattern_weight", s.pattern_weight),
            ("scoring.color_weight", s.color_weight),
            ("scoring.down_weighting.color_penalty", s.down_weighting.color_penalty),
            ("scoring.down_weighting.pattern_penalty", s.down_weighting.pattern_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within 0..=1, got {value}"));
            }
        }
        if (s.pattern_weight + s.color_weight - 1.0).abs() > 1e-6 {
            return invalid(format!(
                "scoring weights must sum to 1, got {} + {}",
                s.pattern_weight, s.color_weight
            ));
        }
        if !(0.0..=1.0).contains(&s.down_weighting.color_floor) {
            return invalid("scoring.down_weighting.color_floor must be within 0..=1".into());
        }
        if !(self.descriptor.ratio_threshold > 0.0 && self.descriptor.ratio_threshold <= 1.0) {
            return invalid(format!(
                "descriptor.ratio_threshold must be within (0, 1], got {}",
                self.descriptor.ratio_threshold
            ));
        }
        if self.descriptor.working_size == 0 || self.mask.working_size == 0 {
            return invalid("working_size must be positive".into());
        }
        if self.descriptor.min_inliers < 4 {
            return invalid("descriptor.min_inliers must be at least 4".into());
        }
        Ok(())
    }
}
