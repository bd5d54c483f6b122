//! CIE L*a*b* conversion and the perceptual color histogram kept in the cache.
//!
//! Colors are expressed on an 8-bit L*a*b* scale: L* stretched from `0..=100`
//! to `0..=255`, a* and b* offset by 128. Color distances in the verifier are
//! measured on this scale, which is the one the `MAX_DISTANCE` calibration
//! constant was tuned against.

use image::RgbImage;
use palette::{white_point::D65, FromColor, Lab, Srgb};
use serde::{Deserialize, Serialize};

/// One pixel on the 8-bit L*a*b* scale.
pub type Lab8 = [f32; 3];

/// Bins per channel in a [`PerceptualHistogram`].
pub const HISTOGRAM_BINS: usize = 32;

/// Convert an sRGB pixel to the 8-bit L*a*b* scale (D65 white point).
#[must_use]
pub fn rgb_to_lab8(rgb: [u8; 3]) -> Lab8 {
    let srgb = Srgb::new(
        f32::from(rgb[0]) / 255.0,
        f32::from(rgb[1]) / 255.0,
        f32::from(rgb[2]) / 255.0,
    );
    let lab: Lab<D65, f32> = Lab::from_color(srgb);
    [lab.l * 255.0 / 100.0, lab.a + 128.0, lab.b + 128.0]
}

/// Convert every pixel of an image, row-major.
#[must_use]
pub fn lab8_pixels(img: &RgbImage) -> Vec<Lab8> {
    img.pixels().map(|p| rgb_to_lab8(p.0)).collect()
}

/// Euclidean distance between two 8-bit L*a*b* colors.
#[inline]
#[must_use]
pub fn lab_distance(a: &Lab8, b: &Lab8) -> f64 {
    let dl = f64::from(a[0] - b[0]);
    let da = f64::from(a[1] - b[1]);
    let db = f64::from(a[2] - b[2]);
    (dl * dl + da * da + db * db).sqrt()
}

/// Normalized per-channel L*a*b* histogram.
///
/// Each channel sums to 1 for a non-empty image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptualHistogram {
    /// L* channel.
    pub l: Vec<f32>,
    /// a* channel.
    pub a: Vec<f32>,
    /// b* channel.
    pub b: Vec<f32>,
}

impl PerceptualHistogram {
    /// Compute the histogram over every pixel of `img`.
    #[must_use]
    pub fn compute(img: &RgbImage) -> Self {
        let mut counts = [[0u32; HISTOGRAM_BINS]; 3];
        for px in img.pixels() {
            let lab = rgb_to_lab8(px.0);
            for (channel, value) in lab.iter().enumerate() {
                counts[channel][bin_index(*value)] += 1;
            }
        }

        let total = (img.width() as usize * img.height() as usize).max(1) as f32;
        let normalize = |c: &[u32; HISTOGRAM_BINS]| -> Vec<f32> {
            c.iter().map(|&n| n as f32 / total).collect()
        };

        Self {
            l: normalize(&counts[0]),
            a: normalize(&counts[1]),
            b: normalize(&counts[2]),
        }
    }

    /// Mean Pearson correlation of the three channels, in `[-1, 1]`.
    #[must_use]
    pub fn correlation(&self, other: &Self) -> f64 {
        let channels = [(&self.l, &other.l), (&self.a, &other.a), (&self.b, &other.b)];
        channels
            .iter()
            .map(|(x, y)| channel_correlation(x, y))
            .sum::<f64>()
            / 3.0
    }

    /// Correlation mapped to `[0, 1]`; anti-correlated histograms score 0.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f64 {
        self.correlation(other).clamp(0.0, 1.0)
    }

    /// Largest absolute difference between corresponding bins.
    #[must_use]
    pub fn max_abs_diff(&self, other: &Self) -> f32 {
        let pairs = self
            .l
            .iter()
            .zip(&other.l)
            .chain(self.a.iter().zip(&other.a))
            .chain(self.b.iter().zip(&other.b));
        pairs.map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }
}

fn bin_index(value: f32) -> usize {
    let scaled = (value / 256.0 * HISTOGRAM_BINS as f32).floor();
    (scaled.max(0.0) as usize).min(HISTOGRAM_BINS - 1)
}

fn channel_correlation(x: &[f32], y: &[f32]) -> f64 {
    if x.len() != y.len() || x.is_empty() {
        return 0.0;
    }
    let n = x.len() as f64;
    let mean_x = x.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let mean_y = y.iter().map(|&v| f64::from(v)).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (&a, &b) in x.iter().zip(y) {
        let dx = f64::from(a) - mean_x;
        let dy = f64::from(b) - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom <= f64::EPSILON {
        return if x == y { 1.0 } else { 0.0 };
    }
    cov / denom
}
