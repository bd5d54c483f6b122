//! Perceptual color verification restricted to the shared foreground.
//!
//! Both images are brought to the working size, masked, converted to 8-bit
//! L*a*b*, and compared pixel by pixel where both masks agree the pixel is
//! icon body. The mean of the per-pixel Euclidean distances is mapped to a
//! similarity with `max(0, 1 - distance / MAX_DISTANCE)`.

use image::RgbImage;
use serde::Serialize;

use crate::imaging::color::{lab8_pixels, lab_distance};
use crate::imaging::{to_working_size, ForegroundMask, Lab8, MaskConfig, MaskGenerator};

/// Calibration constant: distance at which similarity reaches 0.
pub const MAX_DISTANCE: f64 = 300.0;

/// Outcome of a color comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorScore {
    /// Similarity in `[0, 1]`.
    pub similarity: f64,
    /// Mean per-pixel L*a*b* distance over the shared foreground.
    pub mean_distance: f64,
    pub std_distance: f64,
    pub min_distance: f64,
    pub max_distance: f64,
    /// Pixels compared.
    pub compared_pixels: usize,
    /// Compared pixels over all pixels.
    pub coverage: f64,
    /// Coverage fell below the low-confidence ratio.
    pub low_confidence: bool,
}

impl ColorScore {
    fn no_overlap() -> Self {
        Self {
            similarity: 0.0,
            mean_distance: MAX_DISTANCE,
            std_distance: 0.0,
            min_distance: 0.0,
            max_distance: 0.0,
            compared_pixels: 0,
            coverage: 0.0,
            low_confidence: true,
        }
    }
}

/// Compare two images over `mask`.
///
/// Images whose size differs from the mask are resized to it first. Coverage
/// below 5% is flagged low-confidence but still scored.
#[must_use]
pub fn color_similarity(probe: &RgbImage, template: &RgbImage, mask: &ForegroundMask) -> ColorScore {
    let (w, h) = mask.dimensions();
    let probe = resize_to(probe, w, h);
    let template = resize_to(template, w, h);
    score_lab(
        &lab8_pixels(&probe),
        &lab8_pixels(&template),
        mask,
        MAX_DISTANCE,
        MaskConfig::default().low_confidence_ratio,
    )
}

fn resize_to(img: &RgbImage, w: u32, h: u32) -> RgbImage {
    if img.dimensions() == (w, h) {
        img.clone()
    } else {
        image::imageops::resize(img, w, h, image::imageops::FilterType::Triangle)
    }
}

fn score_lab(
    probe: &[Lab8],
    template: &[Lab8],
    mask: &ForegroundMask,
    max_distance: f64,
    low_confidence_ratio: f64,
) -> ColorScore {
    let (w, h) = mask.dimensions();
    let total = w as usize * h as usize;

    let distances: Vec<f64> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, y)| mask.is_foreground(x, y))
        .map(|(x, y)| {
            let i = y as usize * w as usize + x as usize;
            lab_distance(&probe[i], &template[i])
        })
        .collect();

    if distances.is_empty() {
        return ColorScore::no_overlap();
    }

    let n = distances.len() as f64;
    let mean = distances.iter().sum::<f64>() / n;
    let variance = distances.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    let coverage = distances.len() as f64 / total as f64;

    ColorScore {
        similarity: (1.0 - mean / max_distance).max(0.0),
        mean_distance: mean,
        std_distance: variance.sqrt(),
        min_distance: distances.iter().copied().fold(f64::INFINITY, f64::min),
        max_distance: distances.iter().copied().fold(0.0, f64::max),
        compared_pixels: distances.len(),
        coverage,
        low_confidence: coverage < low_confidence_ratio,
    }
}

/// An image brought to the working size with its mask and L*a*b* pixels.
///
/// Preparing once per probe and once per template keeps the per-candidate
/// cost to the distance loop.
#[derive(Debug, Clone)]
pub struct PreparedColor {
    mask: ForegroundMask,
    lab: Vec<Lab8>,
}

impl PreparedColor {
    /// The foreground mask at working size.
    #[must_use]
    pub fn mask(&self) -> &ForegroundMask {
        &self.mask
    }
}

/// Color verifier bound to a mask configuration.
#[derive(Debug, Clone)]
pub struct ColorVerifier {
    masks: MaskGenerator,
    max_distance: f64,
}

impl Default for ColorVerifier {
    fn default() -> Self {
        Self::new(MaskConfig::default())
    }
}

impl ColorVerifier {
    #[must_use]
    pub fn new(mask_config: MaskConfig) -> Self {
        Self {
            masks: MaskGenerator::new(mask_config),
            max_distance: MAX_DISTANCE,
        }
    }

    /// Override the calibration distance.
    #[must_use]
    pub fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance.max(f64::EPSILON);
        self
    }

    /// Resize, mask and convert one image.
    #[must_use]
    pub fn prepare(&self, image: &RgbImage) -> PreparedColor {
        let working = to_working_size(image, self.masks.config().working_size);
        PreparedColor {
            mask: self.masks.generate(&working),
            lab: lab8_pixels(&working),
        }
    }

    /// Compare two prepared images over their shared foreground.
    #[must_use]
    pub fn compare(&self, probe: &PreparedColor, template: &PreparedColor) -> ColorScore {
        let ratio = self.masks.config().low_confidence_ratio;
        match probe.mask.intersect(&template.mask, ratio) {
            Ok(shared) => score_lab(&probe.lab, &template.lab, &shared, self.max_distance, ratio),
            // Both come from the same working size, so this only trips on misuse.
            Err(e) => {
                log::warn!("Color comparison skipped: {}", e);
                ColorScore::no_overlap()
            }
        }
    }

    /// Prepare and compare in one go.
    #[must_use]
    pub fn verify(&self, probe: &RgbImage, template: &RgbImage) -> ColorScore {
        self.compare(&self.prepare(probe), &self.prepare(template))
    }
}
