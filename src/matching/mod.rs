//! Matching a probe icon against the reference catalog.
//!
//! Two strategies share the same catalog and result type:
//!
//! - [`PatternColorMatcher`]: pattern correlation against every template,
//!   color verification of the candidates that clear the pattern threshold,
//!   composite ranking. Falls back to the best raw pattern score when no
//!   template qualifies.
//! - [`DescriptorGeometricMatcher`]: keypoint matching with homography
//!   verification against every template, ranked by confidence.
//!
//! [`Matcher`] selects one of them; [`engine::MatchEngine`] runs it over a
//! directory of probes.

pub mod color;
pub mod descriptor;
pub mod engine;
pub mod pattern;
pub mod scorer;

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::TemplateCache;
use crate::catalog::{Catalog, ReferenceTemplate};
use crate::imaging::{MaskConfig, PerceptualHistogram, ProbeIcon};
use crate::progress::ProgressCallback;
use color::{ColorScore, ColorVerifier};
use descriptor::{DescriptorConfig, DescriptorMatcher, GeometricEvidence};
use scorer::{CompositeScorer, ScoredTemplate, ScoringConfig};

pub use engine::{BatchReport, BatchSummary, EngineError, MatchEngine};

/// The path that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    /// No template cleared the pattern threshold; best raw pattern score.
    PatternOnly,
    /// Pattern and color blended.
    PatternAndColor,
    /// Descriptor matching with geometric verification.
    DescriptorGeometric,
}

impl std::fmt::Display for MatchedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PatternOnly => "pattern_only",
            Self::PatternAndColor => "pattern_and_color",
            Self::DescriptorGeometric => "descriptor_geometric",
        };
        f.write_str(name)
    }
}

/// Which strategy to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MatcherKind {
    /// Pattern correlation refined by color verification.
    #[default]
    PatternColor,
    /// Keypoint descriptors with homography verification.
    Descriptor,
}

/// One template's scores for a probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub template_id: String,
    /// Pattern score in `[0, 100]`; 0 on the descriptor path.
    pub pattern_score: f64,
    /// Color similarity in `[0, 1]`, if verified.
    pub color_score: Option<f64>,
    /// Composite score in `[0, 100]`; descriptor confidence on the descriptor path.
    pub composite_score: f64,
    /// Histogram similarity in `[0, 1]`, diagnostic only.
    pub histogram_similarity: Option<f64>,
    pub low_confidence: bool,
}

/// The outcome for one probe.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub probe_id: String,
    pub probe_path: PathBuf,
    /// `None` only when the catalog is empty.
    pub best: Option<MatchCandidate>,
    pub matched_by: MatchedBy,
    /// Best score reached the acceptance threshold.
    pub accepted: bool,
    pub low_confidence: bool,
    /// Every scored template, best first (diagnostics mode only).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<MatchCandidate>,
    /// Evidence of the winning descriptor attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<GeometricEvidence>,
}

impl MatchResult {
    fn empty(probe: &ProbeIcon, matched_by: MatchedBy) -> Self {
        Self {
            probe_id: probe.id.clone(),
            probe_path: probe.source_path.clone(),
            best: None,
            matched_by,
            accepted: false,
            low_confidence: false,
            candidates: Vec::new(),
            descriptor: None,
        }
    }

    /// Id of the best template, if any.
    #[must_use]
    pub fn best_template_id(&self) -> Option<&str> {
        self.best.as_ref().map(|c| c.template_id.as_str())
    }

    /// Composite score of the best template, 0 without one.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.best.as_ref().map_or(0.0, |c| c.composite_score)
    }
}

/// Pattern matching plus color verification.
#[derive(Debug, Clone, Default)]
pub struct PatternColorMatcher {
    scorer: CompositeScorer,
    verifier: ColorVerifier,
    diagnostics: bool,
}

impl PatternColorMatcher {
    #[must_use]
    pub fn new(scoring: ScoringConfig, mask: MaskConfig) -> Self {
        Self {
            scorer: CompositeScorer::new(scoring),
            verifier: ColorVerifier::new(mask),
            diagnostics: false,
        }
    }

    /// Keep every template's scores in the result.
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn scorer(&self) -> &CompositeScorer {
        &self.scorer
    }

    /// Match one probe against every template in `catalog`.
    #[must_use]
    pub fn match_probe(&self, probe: &ProbeIcon, catalog: &Catalog) -> MatchResult {
        let templates = catalog.templates();
        if templates.is_empty() {
            return MatchResult::empty(probe, MatchedBy::PatternOnly);
        }

        let probe_luma = image::imageops::grayscale(&probe.pixels);
        let pattern_scores: Vec<f64> = templates
            .par_iter()
            .map(|t| pattern::match_pattern_gray(&probe_luma, t.luma()))
            .collect();

        let candidates = self.scorer.select_candidates(&pattern_scores);
        log::debug!(
            "Probe {}: {} of {} templates cleared the pattern threshold",
            probe.id,
            candidates.len(),
            templates.len()
        );

        let verified: Vec<(usize, ColorScore)> = if candidates.is_empty() {
            Vec::new()
        } else {
            let prepared = self.verifier.prepare(&probe.pixels);
            candidates
                .par_iter()
                .map(|&i| {
                    let template = &templates[i];
                    let color = self
                        .verifier
                        .compare(&prepared, template.prepared_color(&self.verifier));
                    (i, color)
                })
                .collect()
        };

        let probe_histogram = (self.diagnostics || !verified.is_empty())
            .then(|| PerceptualHistogram::compute(&probe.pixels));
        let histogram_for = |t: &ReferenceTemplate| {
            probe_histogram
                .as_ref()
                .map(|h| h.similarity(&t.histogram))
        };

        let mut result = MatchResult::empty(probe, MatchedBy::PatternOnly);

        if verified.is_empty() {
            // Fallback: the single highest pattern score, ties to the smaller id.
            let best_idx = best_pattern_index(&pattern_scores);
            let template = &templates[best_idx];
            let (composite, matched_by) = self.scorer.score(pattern_scores[best_idx], None);
            result.best = Some(MatchCandidate {
                template_id: template.id.clone(),
                pattern_score: pattern_scores[best_idx],
                color_score: None,
                composite_score: composite,
                histogram_similarity: histogram_for(template),
                low_confidence: false,
            });
            result.matched_by = matched_by;
            result.accepted = self.scorer.is_accepted(composite);
        } else {
            let scored: Vec<ScoredTemplate<'_>> = verified
                .iter()
                .map(|(i, color)| {
                    let (composite, _) = self.scorer.score(pattern_scores[*i], Some(color.similarity));
                    ScoredTemplate {
                        template_id: &templates[*i].id,
                        pattern_score: pattern_scores[*i],
                        color_score: Some(color.similarity),
                        composite_score: composite,
                    }
                })
                .collect();
            if let Some(pos) = self.scorer.best_index(&scored) {
                let best = &scored[pos];
                let (i, color) = &verified[pos];
                result.best = Some(MatchCandidate {
                    template_id: best.template_id.to_string(),
                    pattern_score: best.pattern_score,
                    color_score: best.color_score,
                    composite_score: best.composite_score,
                    histogram_similarity: histogram_for(&templates[*i]),
                    low_confidence: color.low_confidence,
                });
                result.matched_by = MatchedBy::PatternAndColor;
                result.accepted = self.scorer.is_accepted(best.composite_score);
                result.low_confidence = color.low_confidence;
            }
        }

        if self.diagnostics {
            result.candidates = diagnostic_list(
                templates,
                &pattern_scores,
                &verified,
                &self.scorer,
                &histogram_for,
            );
        }
        result
    }
}

fn best_pattern_index(scores: &[f64]) -> usize {
    // Templates are sorted by id, so the first maximum has the smallest id.
    scores
        .iter()
        .enumerate()
        .fold(0, |best, (i, s)| if *s > scores[best] { i } else { best })
}

/// All templates: color-verified candidates ranked first, then the rest by pattern score.
fn diagnostic_list(
    templates: &[Arc<ReferenceTemplate>],
    pattern_scores: &[f64],
    verified: &[(usize, ColorScore)],
    scorer: &CompositeScorer,
    histogram_for: &dyn Fn(&ReferenceTemplate) -> Option<f64>,
) -> Vec<MatchCandidate> {
    let mut list: Vec<MatchCandidate> = templates
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let color = verified.iter().find(|(vi, _)| *vi == i).map(|(_, c)| c);
            let (composite, _) = scorer.score(pattern_scores[i], color.map(|c| c.similarity));
            MatchCandidate {
                template_id: t.id.clone(),
                pattern_score: pattern_scores[i],
                color_score: color.map(|c| c.similarity),
                composite_score: composite,
                histogram_similarity: histogram_for(t),
                low_confidence: color.is_some_and(|c| c.low_confidence),
            }
        })
        .collect();
    list.sort_by(|a, b| {
        b.color_score
            .is_some()
            .cmp(&a.color_score.is_some())
            .then_with(|| rank_candidates(a, b))
    });
    list
}

fn rank_candidates(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    scorer::rank(
        &ScoredTemplate {
            template_id: &a.template_id,
            pattern_score: a.pattern_score,
            color_score: a.color_score,
            composite_score: a.composite_score,
        },
        &ScoredTemplate {
            template_id: &b.template_id,
            pattern_score: b.pattern_score,
            color_score: b.color_score,
            composite_score: b.composite_score,
        },
    )
}

/// Descriptor matching against every template.
#[derive(Debug, Clone, Default)]
pub struct DescriptorGeometricMatcher {
    matcher: DescriptorMatcher,
    diagnostics: bool,
}

impl DescriptorGeometricMatcher {
    #[must_use]
    pub fn new(config: DescriptorConfig) -> Self {
        Self {
            matcher: DescriptorMatcher::new(config),
            diagnostics: false,
        }
    }

    /// Keep every template's confidence in the result.
    #[must_use]
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    #[must_use]
    pub fn descriptor_matcher(&self) -> &DescriptorMatcher {
        &self.matcher
    }

    /// Match one probe against every template in `catalog`.
    ///
    /// The best attempt is the one with the highest confidence; when every
    /// attempt fails it is still reported, with confidence 0.
    #[must_use]
    pub fn match_probe(&self, probe: &ProbeIcon, catalog: &Catalog) -> MatchResult {
        let templates = catalog.templates();
        if templates.is_empty() {
            return MatchResult::empty(probe, MatchedBy::DescriptorGeometric);
        }

        let probe_set = self.matcher.extract(&probe.pixels);
        let attempts: Vec<GeometricEvidence> = templates
            .par_iter()
            .map(|t| {
                self.matcher
                    .attempt(&probe_set, t.descriptors_or_extract(&self.matcher))
            })
            .collect();

        let best_idx = attempts
            .iter()
            .enumerate()
            .fold(0, |best, (i, e)| {
                if e.confidence > attempts[best].confidence {
                    i
                } else {
                    best
                }
            });
        let evidence = attempts[best_idx].clone();
        log::debug!(
            "Probe {}: best descriptor attempt {} ({})",
            probe.id,
            templates[best_idx].id,
            match &evidence.outcome {
                descriptor::DescriptorOutcome::Verified { confidence } => format!("confidence {confidence}"),
                descriptor::DescriptorOutcome::Failed(reason) => reason.to_string(),
            }
        );

        let to_candidate = |t: &ReferenceTemplate, e: &GeometricEvidence| MatchCandidate {
            template_id: t.id.clone(),
            pattern_score: 0.0,
            color_score: None,
            composite_score: e.confidence,
            histogram_similarity: None,
            low_confidence: !e.outcome.is_verified(),
        };

        let mut result = MatchResult::empty(probe, MatchedBy::DescriptorGeometric);
        result.best = Some(to_candidate(&templates[best_idx], &evidence));
        result.accepted = evidence.is_valid_match;
        result.low_confidence = !evidence.outcome.is_verified();
        result.descriptor = Some(evidence);

        if self.diagnostics {
            let mut list: Vec<MatchCandidate> = templates
                .iter()
                .zip(&attempts)
                .map(|(t, e)| to_candidate(t, e))
                .collect();
            list.sort_by(|a, b| {
                b.composite_score
                    .total_cmp(&a.composite_score)
                    .then_with(|| a.template_id.cmp(&b.template_id))
            });
            result.candidates = list;
        }
        result
    }
}

/// The strategy used for a batch.
#[derive(Debug, Clone)]
pub enum Matcher {
    PatternColor(PatternColorMatcher),
    Descriptor(DescriptorGeometricMatcher),
}

impl Default for Matcher {
    fn default() -> Self {
        Self::PatternColor(PatternColorMatcher::default())
    }
}

impl Matcher {
    /// Build the strategy named by `kind` from the engine settings.
    #[must_use]
    pub fn from_kind(
        kind: MatcherKind,
        scoring: &ScoringConfig,
        mask: &MaskConfig,
        descriptor: &DescriptorConfig,
        diagnostics: bool,
    ) -> Self {
        match kind {
            MatcherKind::PatternColor => Self::PatternColor(
                PatternColorMatcher::new(scoring.clone(), mask.clone()).with_diagnostics(diagnostics),
            ),
            MatcherKind::Descriptor => Self::Descriptor(
                DescriptorGeometricMatcher::new(descriptor.clone()).with_diagnostics(diagnostics),
            ),
        }
    }

    #[must_use]
    pub fn kind(&self) -> MatcherKind {
        match self {
            Self::PatternColor(_) => MatcherKind::PatternColor,
            Self::Descriptor(_) => MatcherKind::Descriptor,
        }
    }

    /// Fill per-template data the strategy needs before a batch.
    ///
    /// The descriptor strategy loads or extracts descriptor sets (writing new
    /// ones back to `cache`); the pattern strategy prepares lazily.
    pub fn prepare(
        &self,
        catalog: &Catalog,
        cache: Option<&TemplateCache>,
        progress: Option<&Arc<dyn ProgressCallback>>,
    ) {
        if let Self::Descriptor(m) = self {
            catalog.prepare_descriptors(cache, m.descriptor_matcher(), progress);
        }
    }

    /// Match one probe.
    #[must_use]
    pub fn match_probe(&self, probe: &ProbeIcon, catalog: &Catalog) -> MatchResult {
        match self {
            Self::PatternColor(m) => m.match_probe(probe, catalog),
            Self::Descriptor(m) => m.match_probe(probe, catalog),
        }
    }
}
