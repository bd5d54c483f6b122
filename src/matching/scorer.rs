//! Composite scoring: candidate selection, pattern/color blending, ranking.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::MatchedBy;

/// Optional penalties for sub-threshold component scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownWeighting {
    pub enabled: bool,
    /// Color similarity below this is penalized.
    pub color_floor: f64,
    pub color_penalty: f64,
    /// Pattern score below this is penalized.
    pub pattern_floor: f64,
    pub pattern_penalty: f64,
}

impl Default for DownWeighting {
    fn default() -> Self {
        Self {
            enabled: true,
            color_floor: 0.5,
            color_penalty: 0.3,
            pattern_floor: 60.0,
            pattern_penalty: 0.5,
        }
    }
}

/// Thresholds and weights for the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Minimum pattern score for a template to reach color verification.
    pub pattern_threshold: f64,
    /// Minimum composite score for a result to be accepted.
    pub accept_threshold: f64,
    pub pattern_weight: f64,
    pub color_weight: f64,
    pub down_weighting: DownWeighting,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            pattern_threshold: 70.0,
            accept_threshold: 60.0,
            pattern_weight: 0.65,
            color_weight: 0.35,
            down_weighting: DownWeighting::default(),
        }
    }
}

/// A template's scores before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredTemplate<'a> {
    pub template_id: &'a str,
    pub pattern_score: f64,
    pub color_score: Option<f64>,
    pub composite_score: f64,
}

/// Applies a [`ScoringConfig`].
#[derive(Debug, Clone, Default)]
pub struct CompositeScorer {
    config: ScoringConfig,
}

impl CompositeScorer {
    #[must_use]
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Whether a pattern score makes a template a color candidate.
    #[must_use]
    pub fn is_candidate(&self, pattern_score: f64) -> bool {
        pattern_score >= self.config.pattern_threshold
    }

    /// Indices of pattern scores that clear the pattern threshold.
    #[must_use]
    pub fn select_candidates(&self, pattern_scores: &[f64]) -> Vec<usize> {
        pattern_scores
            .iter()
            .enumerate()
            .filter(|(_, &score)| self.is_candidate(score))
            .map(|(i, _)| i)
            .collect()
    }

    /// Composite score for one template.
    ///
    /// Without a color score the result is the raw pattern score; penalties
    /// only apply when both components are blended.
    #[must_use]
    pub fn score(&self, pattern_score: f64, color_score: Option<f64>) -> (f64, MatchedBy) {
        let Some(color) = color_score else {
            return (pattern_score, MatchedBy::PatternOnly);
        };

        let cfg = &self.config;
        let dw = &cfg.down_weighting;
        let mut pattern = pattern_score;
        let mut color = color;
        if dw.enabled {
            if color < dw.color_floor {
                color *= dw.color_penalty;
            }
            if pattern < dw.pattern_floor {
                pattern *= dw.pattern_penalty;
            }
        }

        let composite = pattern * cfg.pattern_weight + color * 100.0 * cfg.color_weight;
        (composite.clamp(0.0, 100.0), MatchedBy::PatternAndColor)
    }

    /// Whether a composite score is accepted.
    #[must_use]
    pub fn is_accepted(&self, composite_score: f64) -> bool {
        composite_score >= self.config.accept_threshold
    }

    /// Position of the winner among scored templates, by [`rank`].
    #[must_use]
    pub fn best_index(&self, scored: &[ScoredTemplate<'_>]) -> Option<usize> {
        scored
            .iter()
            .enumerate()
            .min_by(|a, b| rank(a.1, b.1))
            .map(|(i, _)| i)
    }
}

/// Ordering where the better template sorts first: composite descending,
/// then pattern descending, then template id ascending.
#[must_use]
pub fn rank(a: &ScoredTemplate<'_>, b: &ScoredTemplate<'_>) -> Ordering {
    b.composite_score
        .total_cmp(&a.composite_score)
        .then_with(|| b.pattern_score.total_cmp(&a.pattern_score))
        .then_with(|| a.template_id.cmp(b.template_id))
}
