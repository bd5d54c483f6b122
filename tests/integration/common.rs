//! Shared fixtures: deterministic synthetic icons written to temp directories.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Frame color behind inventory icons.
pub const FRAME: [u8; 3] = [46, 33, 46];

/// Bright and dark squares scattered over a flat backdrop.
pub fn textured_icon(size: u32, seed: u64) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = RgbImage::from_pixel(size, size, Rgb([40, 90, 140]));
    for _ in 0..40 {
        let side = rng.gen_range(5..12);
        let x0 = rng.gen_range(0..size - side);
        let y0 = rng.gen_range(0..size - side);
        let color = if rng.gen_bool(0.5) {
            [
                rng.gen_range(200..=255),
                rng.gen_range(180..=255),
                rng.gen_range(100..=200),
            ]
        } else {
            [
                rng.gen_range(0..=30),
                rng.gen_range(0..=30),
                rng.gen_range(0..=40),
            ]
        };
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                img.put_pixel(x, y, Rgb(color));
            }
        }
    }
    img
}

/// A textured icon body inside a circle, framed by the inventory background.
pub fn framed_icon(seed: u64) -> RgbImage {
    let body = textured_icon(116, seed);
    RgbImage::from_fn(116, 116, |x, y| {
        let (dx, dy) = (x as i32 - 58, y as i32 - 58);
        if dx * dx + dy * dy > 48 * 48 {
            Rgb(FRAME)
        } else {
            *body.get_pixel(x, y)
        }
    })
}

/// Save `img` as PNG under `dir/name.png`.
pub fn save_png(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(format!("{name}.png"));
    img.save(&path).unwrap();
    path
}

/// Save `img` as a high-quality JPEG under `dir/name.jpg`.
pub fn save_jpeg(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
    let path = dir.join(format!("{name}.jpg"));
    let file = std::fs::File::create(&path).unwrap();
    JpegEncoder::new_with_quality(file, 95).encode_image(img).unwrap();
    path
}

/// A catalog directory with `count` framed icons named `item_00`, `item_01`, ...
pub fn write_catalog(dir: &Path, count: u64) -> Vec<PathBuf> {
    (0..count)
        .map(|seed| save_png(dir, &format!("item_{seed:02}"), &framed_icon(seed)))
        .collect()
}

/// Serializes tests that read or write `EQUIPMATCH_*` environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Hold [`ENV_MUTEX`], recovering from a poisoned lock.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner)
}
