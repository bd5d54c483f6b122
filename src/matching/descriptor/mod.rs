//! Descriptor fallback matcher with geometric verification.
//!
//! A single attempt walks four stages:
//!
//! 1. **Extract**: keypoints and descriptors for probe and template. Too few
//!    keypoints on either side fails the attempt.
//! 2. **Match**: brute-force Hamming 2-NN with a ratio test. Too few
//!    unambiguous matches fails the attempt.
//! 3. **Verify**: RANSAC homography over the matched points. No model, or
//!    too few inliers, fails the attempt.
//! 4. **Score**: blend good-match ratio, inlier ratio and absolute match
//!    count (40/40/20) into a 0-100 confidence.
//!
//! Failure is a value ([`DescriptorOutcome::Failed`]), never an error, and
//! always carries zero confidence.

pub mod homography;
pub mod orb;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use homography::{find_homography_ransac, Homography, RansacParams};
pub use orb::{hamming_distance, Descriptor, DescriptorSet, Keypoint, OrbExtractor};

/// Settings for the descriptor path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Minimum keypoints on each side.
    pub min_keypoints: usize,
    /// Lowe ratio: best distance must be below `ratio * second best`.
    pub ratio_threshold: f32,
    /// Minimum matches surviving the ratio test.
    pub min_good_matches: usize,
    /// Minimum RANSAC inliers.
    pub min_inliers: usize,
    /// Maximum reprojection error of an inlier, in pixels.
    pub reprojection_threshold: f64,
    /// Upper bound on RANSAC rounds.
    pub ransac_iterations: usize,
    /// Seed for RANSAC sampling.
    pub ransac_seed: u64,
    /// Confidence at which a verified match counts as valid.
    pub valid_confidence: f64,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Cap on keypoints per image.
    pub max_keypoints: usize,
    /// Side length images are standardized to before extraction.
    pub working_size: u32,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            min_keypoints: 10,
            ratio_threshold: 0.75,
            min_good_matches: 10,
            min_inliers: 8,
            reprojection_threshold: 5.0,
            ransac_iterations: 1000,
            ransac_seed: 0x5eed,
            valid_confidence: 60.0,
            fast_threshold: 20,
            max_keypoints: 500,
            working_size: 116,
        }
    }
}

/// Stage of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Extract,
    Match,
    Verify,
    Score,
}

/// Why an attempt ended in [`DescriptorOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Not enough texture on one side.
    #[error("insufficient keypoints (probe {probe}, template {template}, need {required})")]
    InsufficientKeypoints {
        probe: usize,
        template: usize,
        required: usize,
    },
    /// Too few correspondences survived the ratio test.
    #[error("insufficient matches ({good}, need {required})")]
    InsufficientMatches { good: usize, required: usize },
    /// RANSAC found no model.
    #[error("no homography found")]
    NoHomography,
    /// A model was found but too few points agree with it.
    #[error("insufficient inliers ({inliers}, need {required})")]
    InsufficientInliers { inliers: usize, required: usize },
}

impl FailureReason {
    /// The stage that produced this failure.
    #[must_use]
    pub fn stage(&self) -> AttemptStage {
        match self {
            Self::InsufficientKeypoints { .. } => AttemptStage::Extract,
            Self::InsufficientMatches { .. } => AttemptStage::Match,
            Self::NoHomography | Self::InsufficientInliers { .. } => AttemptStage::Verify,
        }
    }
}

/// Terminal state of an attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DescriptorOutcome {
    Verified { confidence: f64 },
    Failed(FailureReason),
}

impl DescriptorOutcome {
    /// Confidence, 0 for failed attempts.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Verified { confidence } => *confidence,
            Self::Failed(_) => 0.0,
        }
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

/// Everything an attempt measured, for diagnostics and ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometricEvidence {
    pub probe_keypoints: usize,
    pub template_keypoints: usize,
    /// Query descriptors that had two neighbors.
    pub knn_pairs: usize,
    /// Matches that passed the ratio test.
    pub good_matches: usize,
    /// RANSAC inliers among the good matches.
    pub inliers: usize,
    pub outcome: DescriptorOutcome,
    /// Same as `outcome.confidence()`.
    pub confidence: f64,
    /// Verified and at or above the valid-confidence threshold.
    pub is_valid_match: bool,
}

impl GeometricEvidence {
    fn failed(probe: usize, template: usize, reason: FailureReason) -> Self {
        Self {
            probe_keypoints: probe,
            template_keypoints: template,
            knn_pairs: 0,
            good_matches: 0,
            inliers: 0,
            outcome: DescriptorOutcome::Failed(reason),
            confidence: 0.0,
            is_valid_match: false,
        }
    }
}

/// A correspondence between a probe and a template descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Brute-force 2-NN matching with Lowe's ratio test.
///
/// Returns the number of query descriptors that had two neighbors and the
/// matches that passed the test.
#[must_use]
pub fn ratio_test_matches(
    query: &DescriptorSet,
    train: &DescriptorSet,
    ratio: f32,
) -> (usize, Vec<DescriptorMatch>) {
    if train.descriptors.len() < 2 {
        return (0, Vec::new());
    }

    let mut knn_pairs = 0;
    let mut good = Vec::new();
    for (query_idx, q) in query.descriptors.iter().enumerate() {
        let mut best = (u32::MAX, 0usize);
        let mut second = u32::MAX;
        for (train_idx, t) in train.descriptors.iter().enumerate() {
            let d = hamming_distance(q, t);
            if d < best.0 {
                second = best.0;
                best = (d, train_idx);
            } else if d < second {
                second = d;
            }
        }
        knn_pairs += 1;
        if (best.0 as f32) < ratio * second as f32 {
            good.push(DescriptorMatch {
                query_idx,
                train_idx: best.1,
                distance: best.0,
            });
        }
    }
    (knn_pairs, good)
}

/// Blend match statistics into a 0-100 confidence, rounded to 2 decimals.
#[must_use]
pub fn confidence_score(good_matches: usize, knn_pairs: usize, inliers: usize) -> f64 {
    let ratio = |num: usize, den: usize| {
        if den == 0 {
            0.0
        } else {
            (num as f64 / den as f64 * 100.0).min(100.0)
        }
    };
    let good_score = ratio(good_matches, knn_pairs);
    let inlier_score = ratio(inliers, good_matches);
    let count_score = ratio(good_matches, 50);
    let blended = good_score * 0.4 + inlier_score * 0.4 + count_score * 0.2;
    (blended * 100.0).round() / 100.0
}

/// Runs descriptor match attempts with a fixed configuration.
#[derive(Debug, Clone)]
pub struct DescriptorMatcher {
    config: DescriptorConfig,
    extractor: OrbExtractor,
}

impl Default for DescriptorMatcher {
    fn default() -> Self {
        Self::new(DescriptorConfig::default())
    }
}

impl DescriptorMatcher {
    #[must_use]
    pub fn new(config: DescriptorConfig) -> Self {
        let extractor = OrbExtractor::new()
            .with_working_size(config.working_size)
            .with_fast_threshold(config.fast_threshold)
            .with_max_keypoints(config.max_keypoints);
        Self { config, extractor }
    }

    #[must_use]
    pub fn config(&self) -> &DescriptorConfig {
        &self.config
    }

    /// Keypoints and descriptors for one image.
    #[must_use]
    pub fn extract(&self, image: &RgbImage) -> DescriptorSet {
        self.extractor.extract(image)
    }

    /// Extract both sides and run an attempt.
    #[must_use]
    pub fn match_images(&self, probe: &RgbImage, template: &RgbImage) -> GeometricEvidence {
        self.attempt(&self.extract(probe), &self.extract(template))
    }

    /// Run one attempt over precomputed descriptor sets.
    #[must_use]
    pub fn attempt(&self, probe: &DescriptorSet, template: &DescriptorSet) -> GeometricEvidence {
        let cfg = &self.config;
        let (np, nt) = (probe.len(), template.len());

        // Extract
        if np < cfg.min_keypoints || nt < cfg.min_keypoints {
            return GeometricEvidence::failed(
                np,
                nt,
                FailureReason::InsufficientKeypoints {
                    probe: np,
                    template: nt,
                    required: cfg.min_keypoints,
                },
            );
        }

        // Match
        let (knn_pairs, good) = ratio_test_matches(probe, template, cfg.ratio_threshold);
        if good.len() < cfg.min_good_matches {
            let mut evidence = GeometricEvidence::failed(
                np,
                nt,
                FailureReason::InsufficientMatches {
                    good: good.len(),
                    required: cfg.min_good_matches,
                },
            );
            evidence.knn_pairs = knn_pairs;
            evidence.good_matches = good.len();
            return evidence;
        }

        // Verify: template points mapped onto probe points.
        let (src, dst): (Vec<homography::Point>, Vec<homography::Point>) = good
            .iter()
            .map(|m| {
                let t = &template.keypoints[m.train_idx];
                let p = &probe.keypoints[m.query_idx];
                ([f64::from(t.x), f64::from(t.y)], [f64::from(p.x), f64::from(p.y)])
            })
            .unzip();
        let params = RansacParams {
            threshold: cfg.reprojection_threshold,
            max_iterations: cfg.ransac_iterations,
            seed: cfg.ransac_seed,
            ..RansacParams::default()
        };
        let fit = find_homography_ransac(&src, &dst, &params);
        let inliers = fit.as_ref().map_or(0, |f| f.inlier_count);

        let failure = match &fit {
            None => Some(FailureReason::NoHomography),
            Some(f) if f.inlier_count < cfg.min_inliers => Some(FailureReason::InsufficientInliers {
                inliers: f.inlier_count,
                required: cfg.min_inliers,
            }),
            Some(_) => None,
        };
        if let Some(reason) = failure {
            let mut evidence = GeometricEvidence::failed(np, nt, reason);
            evidence.knn_pairs = knn_pairs;
            evidence.good_matches = good.len();
            evidence.inliers = inliers;
            return evidence;
        }

        // Score
        let confidence = confidence_score(good.len(), knn_pairs, inliers);
        GeometricEvidence {
            probe_keypoints: np,
            template_keypoints: nt,
            knn_pairs,
            good_matches: good.len(),
            inliers,
            outcome: DescriptorOutcome::Verified { confidence },
            confidence,
            is_valid_match: confidence >= cfg.valid_confidence,
        }
    }
}
