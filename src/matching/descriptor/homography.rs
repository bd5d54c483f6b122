//! Planar homography estimation: normalized DLT inside a seeded RANSAC loop.

use nalgebra::{Matrix3, SMatrix, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// 2D point `[x, y]`.
pub type Point = [f64; 2];

const MIN_SAMPLE: usize = 4;

/// A 3x3 projective transform mapping source points onto destination points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// Least-squares fit to `n >= 4` correspondences.
    ///
    /// Returns `None` for degenerate input (too few points, collinear
    /// configurations, singular result).
    #[must_use]
    pub fn fit(src: &[Point], dst: &[Point]) -> Option<Self> {
        if src.len() != dst.len() || src.len() < MIN_SAMPLE {
            return None;
        }

        let t_src = normalizing_transform(src)?;
        let t_dst = normalizing_transform(dst)?;

        let mut ata = SMatrix::<f64, 9, 9>::zeros();
        for (s, d) in src.iter().zip(dst) {
            let s = apply(&t_src, *s)?;
            let d = apply(&t_dst, *d)?;
            let (x, y, u, v) = (s[0], s[1], d[0], d[1]);
            let rows = [
                [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
                [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v],
            ];
            for row in &rows {
                for i in 0..9 {
                    for j in 0..9 {
                        ata[(i, j)] += row[i] * row[j];
                    }
                }
            }
        }

        let eig = ata.symmetric_eigen();
        let (min_idx, _) = eig
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.total_cmp(b.1))?;
        let h = eig.eigenvectors.column(min_idx);
        let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let t_dst_inv = t_dst.try_inverse()?;
        let mut m = t_dst_inv * normalized * t_src;
        let scale = m[(2, 2)];
        if scale.abs() > f64::EPSILON {
            m /= scale;
        }
        if !m.iter().all(|v| v.is_finite()) || m.determinant().abs() < 1e-12 {
            return None;
        }
        Some(Self(m))
    }

    /// The underlying matrix.
    #[must_use]
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Map a point; `None` when it lands at infinity.
    #[must_use]
    pub fn project(&self, p: Point) -> Option<Point> {
        apply(&self.0, p)
    }

    /// Euclidean distance between `H * src` and `dst`.
    #[must_use]
    pub fn reprojection_error(&self, src: Point, dst: Point) -> f64 {
        match self.project(src) {
            Some(p) => ((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt(),
            None => f64::INFINITY,
        }
    }
}

/// RANSAC settings.
#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// Maximum reprojection error of an inlier, in pixels.
    pub threshold: f64,
    /// Upper bound on sampling rounds.
    pub max_iterations: usize,
    /// Target probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// RNG seed; fixed so repeated runs agree.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            max_iterations: 1000,
            confidence: 0.995,
            seed: 0x5eed,
        }
    }
}

/// A RANSAC result after the least-squares refit.
#[derive(Debug, Clone)]
pub struct RansacFit {
    pub homography: Homography,
    /// Inlier flag per correspondence.
    pub inliers: Vec<bool>,
    pub inlier_count: usize,
}

/// Robustly fit a homography, tolerating outlier correspondences.
#[must_use]
pub fn find_homography_ransac(src: &[Point], dst: &[Point], params: &RansacParams) -> Option<RansacFit> {
    let n = src.len();
    if n != dst.len() || n < MIN_SAMPLE {
        return None;
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Homography, usize, f64)> = None;
    let mut required = params.max_iterations;
    let mut iteration = 0;

    while iteration < required.min(params.max_iterations) {
        iteration += 1;
        let sample = rand::seq::index::sample(&mut rng, n, MIN_SAMPLE).into_vec();
        let s: Vec<Point> = sample.iter().map(|&i| src[i]).collect();
        let d: Vec<Point> = sample.iter().map(|&i| dst[i]).collect();
        if has_collinear_triple(&s) || has_collinear_triple(&d) {
            continue;
        }
        let Some(h) = Homography::fit(&s, &d) else {
            continue;
        };

        let (count, error) = score(&h, src, dst, params.threshold);
        let better = match &best {
            None => count >= MIN_SAMPLE,
            Some((_, best_count, best_error)) => {
                count > *best_count || (count == *best_count && error < *best_error)
            }
        };
        if better {
            best = Some((h, count, error));
            required = adaptive_iterations(count, n, params.confidence).max(1);
        }
    }

    let (h, count, _) = best?;
    let mut fit = RansacFit {
        inliers: inlier_mask(&h, src, dst, params.threshold),
        homography: h,
        inlier_count: count,
    };

    // Refit on the consensus set; keep it only if it does not lose support.
    let (s, d): (Vec<Point>, Vec<Point>) = src
        .iter()
        .zip(dst)
        .zip(&fit.inliers)
        .filter(|(_, &inlier)| inlier)
        .map(|((s, d), _)| (*s, *d))
        .unzip();
    if let Some(refit) = Homography::fit(&s, &d) {
        let mask = inlier_mask(&refit, src, dst, params.threshold);
        let refit_count = mask.iter().filter(|&&m| m).count();
        if refit_count >= fit.inlier_count {
            fit = RansacFit {
                homography: refit,
                inliers: mask,
                inlier_count: refit_count,
            };
        }
    }

    log::trace!(
        "RANSAC: {}/{} inliers after {} iterations",
        fit.inlier_count,
        n,
        iteration
    );
    Some(fit)
}

fn score(h: &Homography, src: &[Point], dst: &[Point], threshold: f64) -> (usize, f64) {
    src.iter()
        .zip(dst)
        .map(|(s, d)| h.reprojection_error(*s, *d))
        .filter(|e| *e <= threshold)
        .fold((0, 0.0), |(count, total), e| (count + 1, total + e))
}

fn inlier_mask(h: &Homography, src: &[Point], dst: &[Point], threshold: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| h.reprojection_error(*s, *d) <= threshold)
        .collect()
}

fn adaptive_iterations(inliers: usize, total: usize, confidence: f64) -> usize {
    let w = inliers as f64 / total as f64;
    let p_good = w.powi(MIN_SAMPLE as i32);
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    if p_good <= f64::EPSILON {
        return usize::MAX;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if k.is_finite() {
        k.ceil() as usize
    } else {
        usize::MAX
    }
}

fn has_collinear_triple(points: &[Point]) -> bool {
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            for k in (j + 1)..points.len() {
                let (a, b, c) = (points[i], points[j], points[k]);
                let area = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
                if area.abs() < 1e-6 {
                    return true;
                }
            }
        }
    }
    false
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2).
fn normalizing_transform(points: &[Point]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

fn apply(m: &Matrix3<f64>, p: Point) -> Option<Point> {
    let v = m * Vector3::new(p[0], p[1], 1.0);
    if v[2].abs() < 1e-12 {
        return None;
    }
    Some([v[0] / v[2], v[1] / v[2]])
}
