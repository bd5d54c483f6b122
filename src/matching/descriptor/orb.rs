//! ORB-style keypoints and binary descriptors.
//!
//! Images are standardized to the working size, histogram-equalized and
//! lightly blurred before FAST-9 corner detection. Each surviving corner gets
//! an intensity-centroid orientation and a 256-bit rotated BRIEF descriptor.
//! Everything is deterministic: the BRIEF sampling pattern comes from a fixed
//! seed.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::OnceLock;

use image::{GrayImage, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::imaging::to_working_size;

/// A 256-bit binary descriptor.
pub type Descriptor = [u8; 32];

/// Radius of the orientation patch.
const ORIENTATION_RADIUS: i32 = 15;

/// Half-extent of BRIEF sample offsets before rotation.
const BRIEF_EXTENT: i8 = 13;

/// Corners closer than this to the border are dropped.
const EDGE_MARGIN: u32 = 12;

/// Cell size of the grid non-maximum suppression.
const NMS_CELL: f32 = 3.0;

const BRIEF_SEED: u64 = 0x0b5e_55ed_b41e_f00d;

/// A detected keypoint in working-size coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// FAST corner score.
    pub response: f32,
    /// Orientation in radians.
    pub angle: f32,
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptorSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl DescriptorSet {
    /// Number of keypoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether no keypoints were found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Hamming distance between two descriptors.
#[inline]
#[must_use]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Fixed BRIEF test pattern: 256 point pairs `(x1, y1, x2, y2)`.
fn brief_pattern() -> &'static [(i8, i8, i8, i8); 256] {
    static PATTERN: OnceLock<[(i8, i8, i8, i8); 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(BRIEF_SEED);
        let mut pattern = [(0i8, 0i8, 0i8, 0i8); 256];
        for pair in pattern.iter_mut() {
            *pair = (
                rng.gen_range(-BRIEF_EXTENT..=BRIEF_EXTENT),
                rng.gen_range(-BRIEF_EXTENT..=BRIEF_EXTENT),
                rng.gen_range(-BRIEF_EXTENT..=BRIEF_EXTENT),
                rng.gen_range(-BRIEF_EXTENT..=BRIEF_EXTENT),
            );
        }
        pattern
    })
}

/// Keypoint and descriptor extractor.
#[derive(Debug, Clone)]
pub struct OrbExtractor {
    working_size: u32,
    fast_threshold: u8,
    max_keypoints: usize,
    blur_sigma: f32,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self {
            working_size: 116,
            fast_threshold: 20,
            max_keypoints: 500,
            blur_sigma: 0.8,
        }
    }
}

impl OrbExtractor {
    /// Create an extractor with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the side length images are standardized to.
    #[must_use]
    pub fn with_working_size(mut self, size: u32) -> Self {
        self.working_size = size.max(2 * EDGE_MARGIN + 1);
        self
    }

    /// Set the FAST intensity threshold.
    #[must_use]
    pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
        self.fast_threshold = threshold;
        self
    }

    /// Cap the number of keypoints kept, strongest first.
    #[must_use]
    pub fn with_max_keypoints(mut self, max: usize) -> Self {
        self.max_keypoints = max;
        self
    }

    /// Standardize, equalize and blur.
    #[must_use]
    pub fn preprocess(&self, image: &RgbImage) -> GrayImage {
        let standardized = to_working_size(image, self.working_size);
        let gray = image::imageops::grayscale(&standardized);
        let equalized = equalize_histogram(&gray);
        if self.blur_sigma > 0.0 {
            gaussian_blur_f32(&equalized, self.blur_sigma)
        } else {
            equalized
        }
    }

    /// Detect keypoints and compute their descriptors.
    #[must_use]
    pub fn extract(&self, image: &RgbImage) -> DescriptorSet {
        let gray = self.preprocess(image);
        self.extract_gray(&gray)
    }

    /// Detect and describe on an already preprocessed image.
    #[must_use]
    pub fn extract_gray(&self, gray: &GrayImage) -> DescriptorSet {
        let (w, h) = gray.dimensions();
        if w <= 2 * EDGE_MARGIN || h <= 2 * EDGE_MARGIN {
            return DescriptorSet::default();
        }

        let corners: Vec<Keypoint> = corners_fast9(gray, self.fast_threshold)
            .into_iter()
            .filter(|c| {
                c.x >= EDGE_MARGIN && c.y >= EDGE_MARGIN && c.x < w - EDGE_MARGIN && c.y < h - EDGE_MARGIN
            })
            .map(|c| Keypoint {
                x: c.x as f32,
                y: c.y as f32,
                response: c.score,
                angle: 0.0,
            })
            .collect();

        let mut keypoints = suppress_non_maxima(corners, self.max_keypoints);
        let descriptors = keypoints
            .iter_mut()
            .map(|kp| {
                kp.angle = orientation(gray, kp.x as i32, kp.y as i32);
                describe(gray, kp)
            })
            .collect();

        DescriptorSet {
            keypoints,
            descriptors,
        }
    }
}

/// Keep the strongest corner per grid neighborhood, strongest first.
fn suppress_non_maxima(mut corners: Vec<Keypoint>, max_keypoints: usize) -> Vec<Keypoint> {
    corners.sort_by(|a, b| {
        b.response
            .partial_cmp(&a.response)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.y.total_cmp(&b.y))
            .then_with(|| a.x.total_cmp(&b.x))
    });

    let mut occupied = HashSet::new();
    let mut selected = Vec::new();
    for corner in corners {
        if selected.len() >= max_keypoints {
            break;
        }
        let cell = (
            (corner.x / NMS_CELL) as i32,
            (corner.y / NMS_CELL) as i32,
        );
        let blocked = (-1..=1).any(|dy| (-1..=1).any(|dx| occupied.contains(&(cell.0 + dx, cell.1 + dy))));
        if blocked {
            continue;
        }
        occupied.insert(cell);
        selected.push(corner);
    }
    selected
}

/// Intensity-centroid orientation over a disc around `(x, y)`.
fn orientation(gray: &GrayImage, x: i32, y: i32) -> f32 {
    let (w, h) = (gray.width() as i32, gray.height() as i32);
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;
    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let (px, py) = (x + dx, y + dy);
            if px < 0 || py < 0 || px >= w || py >= h {
                continue;
            }
            let intensity = f32::from(gray.get_pixel(px as u32, py as u32)[0]);
            m01 += intensity * dy as f32;
            m10 += intensity * dx as f32;
        }
    }
    m01.atan2(m10)
}

/// Rotated BRIEF descriptor for one keypoint.
fn describe(gray: &GrayImage, kp: &Keypoint) -> Descriptor {
    let (w, h) = (gray.width() as i32, gray.height() as i32);
    let (sin, cos) = kp.angle.sin_cos();
    let (cx, cy) = (kp.x, kp.y);
    let sample = |dx: i8, dy: i8| -> u8 {
        let (dx, dy) = (f32::from(dx), f32::from(dy));
        let px = (cx + dx * cos - dy * sin).round() as i32;
        let py = (cy + dx * sin + dy * cos).round() as i32;
        gray.get_pixel(px.clamp(0, w - 1) as u32, py.clamp(0, h - 1) as u32)[0]
    };

    let mut descriptor = [0u8; 32];
    for (byte_idx, tests) in brief_pattern().chunks(8).enumerate() {
        let mut byte = 0u8;
        for (bit, &(x1, y1, x2, y2)) in tests.iter().enumerate() {
            if sample(x1, y1) < sample(x2, y2) {
                byte |= 1 << bit;
            }
        }
        descriptor[byte_idx] = byte;
    }
    descriptor
}
