//! Foreground mask generation.
//!
//! Equipment icons sit on a small set of known background shades (the purple
//! frame of the inventory screen). A pixel is background when it falls inside
//! the per-channel tolerance band of any configured [`BackgroundFamily`];
//! everything else is candidate foreground. The raw mask is cleaned with a
//! 3x3 closing and opening, softened with a light blur and re-binarized, and
//! finally clipped to a circular region of interest matching the icon frame.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Errors from mask algebra.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskError {
    /// Two masks with different dimensions cannot be combined.
    #[error("Mask dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch { left: (u32, u32), right: (u32, u32) },
}

/// A known background color with an independent per-channel tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundFamily {
    /// Reference color, RGB.
    pub color: [u8; 3],
    /// Allowed absolute deviation per channel.
    pub tolerance: [u8; 3],
}

impl BackgroundFamily {
    /// Create a family with a per-channel tolerance.
    #[must_use]
    pub const fn new(color: [u8; 3], tolerance: [u8; 3]) -> Self {
        Self { color, tolerance }
    }

    /// Create a family with the same tolerance on every channel.
    #[must_use]
    pub const fn uniform(color: [u8; 3], tolerance: u8) -> Self {
        Self::new(color, [tolerance, tolerance, tolerance])
    }

    /// Whether `pixel` lies within the tolerance band of this family.
    #[inline]
    #[must_use]
    pub fn contains(&self, pixel: &Rgb<u8>) -> bool {
        pixel
            .0
            .iter()
            .zip(self.color.iter().zip(&self.tolerance))
            .all(|(&p, (&c, &t))| p.abs_diff(c) <= t)
    }
}

/// Purple shades observed behind equipment icons.
#[must_use]
pub fn default_background_families() -> Vec<BackgroundFamily> {
    vec![
        BackgroundFamily::uniform([46, 33, 46], 20),
        BackgroundFamily::uniform([103, 53, 79], 50),
        BackgroundFamily::uniform([244, 245, 244], 5),
    ]
}

/// Settings for [`MaskGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Background color families; any match marks a pixel as background.
    pub background_families: Vec<BackgroundFamily>,
    /// Radius of the circular region of interest in working-size pixels. 0 disables it.
    pub roi_radius: u32,
    /// Side length images are resized to before masking and color comparison.
    pub working_size: u32,
    /// Foreground ratio below which a mask is flagged low-confidence.
    pub low_confidence_ratio: f64,
    /// Sigma of the boundary-softening blur. 0 disables it.
    pub smoothing_sigma: f32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            background_families: default_background_families(),
            roi_radius: 55,
            working_size: 116,
            low_confidence_ratio: 0.05,
            smoothing_sigma: 0.5,
        }
    }
}

/// Binary foreground mask. Pixels are either 0 (background) or 255 (foreground).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundMask {
    mask: GrayImage,
    foreground: usize,
    low_confidence: bool,
}

impl ForegroundMask {
    /// Wrap a raw mask, counting foreground pixels.
    fn from_image(mask: GrayImage, low_confidence_ratio: f64) -> Self {
        let foreground = mask.pixels().filter(|p| p[0] == FOREGROUND).count();
        let total = mask.width() as usize * mask.height() as usize;
        let ratio = if total == 0 {
            0.0
        } else {
            foreground as f64 / total as f64
        };
        Self {
            mask,
            foreground,
            low_confidence: ratio < low_confidence_ratio,
        }
    }

    /// A mask that keeps every pixel.
    #[must_use]
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::from_pixel(width, height, Luma([FOREGROUND])),
            foreground: width as usize * height as usize,
            low_confidence: false,
        }
    }

    /// Mask dimensions.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.mask.dimensions()
    }

    /// Whether the pixel at `(x, y)` is foreground.
    #[inline]
    #[must_use]
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.mask.get_pixel(x, y)[0] == FOREGROUND
    }

    /// Number of foreground pixels.
    #[must_use]
    pub fn foreground_pixels(&self) -> usize {
        self.foreground
    }

    /// Foreground pixels over total pixels.
    #[must_use]
    pub fn foreground_ratio(&self) -> f64 {
        let total = self.mask.width() as usize * self.mask.height() as usize;
        if total == 0 {
            0.0
        } else {
            self.foreground as f64 / total as f64
        }
    }

    /// Whether so little foreground survived that downstream scores are unreliable.
    #[must_use]
    pub fn is_low_confidence(&self) -> bool {
        self.low_confidence
    }

    /// Pixels both masks agree are icon body.
    pub fn intersect(&self, other: &Self, low_confidence_ratio: f64) -> Result<Self, MaskError> {
        if self.dimensions() != other.dimensions() {
            return Err(MaskError::DimensionMismatch {
                left: self.dimensions(),
                right: other.dimensions(),
            });
        }
        let (w, h) = self.dimensions();
        let shared = GrayImage::from_fn(w, h, |x, y| {
            if self.is_foreground(x, y) && other.is_foreground(x, y) {
                Luma([FOREGROUND])
            } else {
                Luma([BACKGROUND])
            }
        });
        Ok(Self::from_image(shared, low_confidence_ratio))
    }

    /// The underlying 0/255 image.
    #[must_use]
    pub fn as_image(&self) -> &GrayImage {
        &self.mask
    }
}

/// Compute a foreground mask for `image`.
///
/// `roi_radius` clips the mask to a centered circle; it is clamped to half the
/// smaller image dimension. The mask is flagged low-confidence below 5%
/// foreground.
#[must_use]
pub fn compute_foreground_mask(
    image: &RgbImage,
    families: &[BackgroundFamily],
    roi_radius: Option<u32>,
) -> ForegroundMask {
    let config = MaskConfig {
        background_families: families.to_vec(),
        roi_radius: roi_radius.unwrap_or(0),
        ..MaskConfig::default()
    };
    MaskGenerator::new(config).generate(image)
}

/// Produces foreground masks from a fixed [`MaskConfig`].
#[derive(Debug, Clone, Default)]
pub struct MaskGenerator {
    config: MaskConfig,
}

impl MaskGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new(config: MaskConfig) -> Self {
        Self { config }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &MaskConfig {
        &self.config
    }

    /// Generate the mask for an image at its own resolution.
    #[must_use]
    pub fn generate(&self, image: &RgbImage) -> ForegroundMask {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return ForegroundMask::from_image(GrayImage::new(w, h), self.config.low_confidence_ratio);
        }

        let families = &self.config.background_families;
        let raw = GrayImage::from_fn(w, h, |x, y| {
            let px = image.get_pixel(x, y);
            if families.iter().any(|f| f.contains(px)) {
                Luma([BACKGROUND])
            } else {
                Luma([FOREGROUND])
            }
        });

        let cleaned = open(&close(&raw, Norm::LInf, 1), Norm::LInf, 1);
        let mut smoothed = if self.config.smoothing_sigma > 0.0 {
            let mut blurred = gaussian_blur_f32(&cleaned, self.config.smoothing_sigma);
            binarize(&mut blurred);
            blurred
        } else {
            cleaned
        };

        if self.config.roi_radius > 0 {
            apply_circular_roi(&mut smoothed, self.config.roi_radius);
        }

        let mask = ForegroundMask::from_image(smoothed, self.config.low_confidence_ratio);
        if mask.is_low_confidence() {
            log::warn!(
                "Foreground mask covers only {:.1}% of a {}x{} image; downstream scores are low-confidence",
                mask.foreground_ratio() * 100.0,
                w,
                h
            );
        }
        mask
    }
}

fn binarize(img: &mut GrayImage) {
    for px in img.pixels_mut() {
        px[0] = if px[0] >= 128 { FOREGROUND } else { BACKGROUND };
    }
}

/// Zero every pixel outside a circle centered on the image.
fn apply_circular_roi(mask: &mut GrayImage, radius: u32) {
    let (w, h) = mask.dimensions();
    let radius = f64::from(radius.min(w.min(h) / 2));
    let cx = (f64::from(w) - 1.0) / 2.0;
    let cy = (f64::from(h) - 1.0) / 2.0;
    let r2 = radius * radius;

    for (x, y, px) in mask.enumerate_pixels_mut() {
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        if dx * dx + dy * dy > r2 {
            px[0] = BACKGROUND;
        }
    }
}
