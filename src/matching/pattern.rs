//! Zero-mean normalized cross-correlation on luminance.
//!
//! The template slides over every placement inside the probe; the peak
//! correlation, clamped at zero, is mapped linearly onto `0..=100`. A
//! template larger than the probe is shrunk to fit first. The probe is never
//! upsampled.
//!
//! Zero variance makes the correlation undefined:
//!
//! * exactly one of the two images is flat: score 0
//! * both are flat: score is their mean-intensity agreement,
//!   `(1 - |mean_p - mean_t| / 255) * 100`

use image::imageops::FilterType;
use image::{GrayImage, RgbImage};

/// Sum of squared deviations below which a patch counts as flat.
const FLAT_EPSILON: f64 = 1e-6;

/// Pattern similarity between a probe and a template, in `[0, 100]`.
#[must_use]
pub fn match_pattern(probe: &RgbImage, template: &RgbImage) -> f64 {
    let probe = image::imageops::grayscale(probe);
    let template = image::imageops::grayscale(template);
    match_pattern_gray(&probe, &template)
}

/// [`match_pattern`] on images already reduced to luminance.
#[must_use]
pub fn match_pattern_gray(probe: &GrayImage, template: &GrayImage) -> f64 {
    if is_empty(probe) || is_empty(template) {
        return 0.0;
    }

    let template = fit_within(template, probe.width(), probe.height());
    let probe_flat = is_flat(probe);
    let template_flat = is_flat(&template);

    match (probe_flat, template_flat) {
        (true, true) => {
            let diff = (mean(probe) - mean(&template)).abs();
            ((1.0 - diff / 255.0) * 100.0).clamp(0.0, 100.0)
        }
        (true, false) | (false, true) => 0.0,
        (false, false) => peak_correlation(probe, &template).clamp(0.0, 1.0) * 100.0,
    }
}

fn is_empty(img: &GrayImage) -> bool {
    img.width() == 0 || img.height() == 0
}

/// Shrink `template` (aspect preserved) so it fits inside `max_w x max_h`.
fn fit_within(template: &GrayImage, max_w: u32, max_h: u32) -> GrayImage {
    let (tw, th) = template.dimensions();
    if tw <= max_w && th <= max_h {
        return template.clone();
    }
    let scale = (f64::from(max_w) / f64::from(tw)).min(f64::from(max_h) / f64::from(th));
    let nw = ((f64::from(tw) * scale).round() as u32).clamp(1, max_w);
    let nh = ((f64::from(th) * scale).round() as u32).clamp(1, max_h);
    image::imageops::resize(template, nw, nh, FilterType::Triangle)
}

fn mean(img: &GrayImage) -> f64 {
    let n = img.width() as f64 * img.height() as f64;
    img.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n
}

fn is_flat(img: &GrayImage) -> bool {
    let first = img.get_pixel(0, 0)[0];
    img.pixels().all(|p| p[0] == first)
}

/// Summed-area tables of values and squared values, one row/column of padding.
struct IntegralImages {
    width: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl IntegralImages {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sum_sq = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = f64::from(img.get_pixel(x as u32, y as u32)[0]);
                row += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
            }
        }
        Self {
            width: stride,
            sum,
            sum_sq,
        }
    }

    fn window(&self, table: &[f64], x: usize, y: usize, w: usize, h: usize) -> f64 {
        let s = self.width;
        table[(y + h) * s + x + w] - table[y * s + x + w] - table[(y + h) * s + x] + table[y * s + x]
    }
}

/// Peak zero-mean NCC over every placement of `template` inside `probe`.
fn peak_correlation(probe: &GrayImage, template: &GrayImage) -> f64 {
    let (pw, ph) = (probe.width() as usize, probe.height() as usize);
    let (tw, th) = (template.width() as usize, template.height() as usize);
    let n = (tw * th) as f64;

    let t_mean = mean(template);
    let t_centered: Vec<f64> = template.pixels().map(|p| f64::from(p[0]) - t_mean).collect();
    let t_ss: f64 = t_centered.iter().map(|v| v * v).sum();
    if t_ss < FLAT_EPSILON {
        return 0.0;
    }

    let probe_values: Vec<f64> = probe.pixels().map(|p| f64::from(p[0])).collect();
    let integrals = IntegralImages::new(probe);

    let mut peak = f64::NEG_INFINITY;
    for y in 0..=(ph - th) {
        for x in 0..=(pw - tw) {
            let s = integrals.window(&integrals.sum, x, y, tw, th);
            let s2 = integrals.window(&integrals.sum_sq, x, y, tw, th);
            let w_ss = s2 - s * s / n;
            if w_ss < FLAT_EPSILON {
                continue;
            }

            // The template is zero-mean, so the window mean drops out of the cross term.
            let mut cross = 0.0;
            for ty in 0..th {
                let row = (y + ty) * pw + x;
                let t_row = ty * tw;
                for tx in 0..tw {
                    cross += probe_values[row + tx] * t_centered[t_row + tx];
                }
            }
            let r = cross / (w_ss * t_ss).sqrt();
            if r > peak {
                peak = r;
            }
        }
    }

    if peak.is_finite() {
        peak.min(1.0)
    } else {
        0.0
    }
}
