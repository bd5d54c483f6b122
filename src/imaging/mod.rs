//! Image loading and pixel-level helpers shared by the matchers.
//!
//! Everything downstream works on owned `RgbImage` buffers. Alpha is
//! flattened away on load; icons are compared on their visible color only.

pub mod color;
pub mod mask;

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use thiserror::Error;

pub use color::{rgb_to_lab8, Lab8, PerceptualHistogram};
pub use mask::{compute_foreground_mask, BackgroundFamily, ForegroundMask, MaskConfig, MaskGenerator};

/// File extensions the catalog and probe loaders accept (lowercase).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp"];

/// Errors that can occur while reading or decoding an image.
#[derive(Debug, Error)]
pub enum ImageLoadError {
    /// The file could not be read.
    #[error("Failed to read image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The bytes are not a decodable image.
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Decoding produced an image with no pixels.
    #[error("Image {0} has no pixels")]
    Empty(PathBuf),
}

/// Check whether a path has one of the [`SUPPORTED_EXTENSIONS`].
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Check whether a path names an image format this build cannot decode,
/// such as `.ico` or `.avif`.
#[must_use]
pub fn is_unsupported_image(path: &Path) -> bool {
    path.extension()
        .and_then(ImageFormat::from_extension)
        .is_some()
        && !is_supported_image(path)
}

/// Identifier derived from a file name: the file stem.
#[must_use]
pub fn file_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Read a file into memory.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>, ImageLoadError> {
    fs::read(path).map_err(|source| ImageLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode in-memory bytes into an RGB buffer.
///
/// `path` is only used for error reporting.
pub fn decode_rgb(bytes: &[u8], path: &Path) -> Result<RgbImage, ImageLoadError> {
    let img = image::load_from_memory(bytes).map_err(|source| ImageLoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let rgb = img.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(ImageLoadError::Empty(path.to_path_buf()));
    }
    Ok(rgb)
}

/// Resize to a square working size, skipping the copy-free case.
#[must_use]
pub fn to_working_size(img: &RgbImage, size: u32) -> RgbImage {
    if img.width() == size && img.height() == size {
        return img.clone();
    }
    image::imageops::resize(img, size, size, FilterType::Triangle)
}

/// A cropped screenshot icon waiting to be identified.
///
/// Probes are transient: created per match request, never persisted.
#[derive(Debug, Clone)]
pub struct ProbeIcon {
    /// File stem of the source file.
    pub id: String,
    /// Where the probe was loaded from.
    pub source_path: PathBuf,
    /// Decoded pixels.
    pub pixels: RgbImage,
}

impl ProbeIcon {
    /// Load and decode a probe from disk.
    pub fn load(path: &Path) -> Result<Self, ImageLoadError> {
        let bytes = read_bytes(path)?;
        let pixels = decode_rgb(&bytes, path)?;
        Ok(Self::from_image(path, pixels))
    }

    /// Wrap an already decoded image.
    #[must_use]
    pub fn from_image(path: &Path, pixels: RgbImage) -> Self {
        Self {
            id: file_id(path),
            source_path: path.to_path_buf(),
            pixels,
        }
    }
}
