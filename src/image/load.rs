//! Decoding images into immutable sources.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use image::{imageops::FilterType, DynamicImage, RgbImage};

use crate::error::{Error, Result};

/// Decoded RGB pixels plus the name of where they came from.
///
/// Cloning shares the pixel buffer.
#[derive(Clone)]
pub struct ImageSource {
    name: String,
    pixels: Arc<RgbImage>,
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSource")
            .field("name", &self.name)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl ImageSource {
    /// Load an image from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageDecode`] naming the path if the file cannot be
    /// read or decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let img = image::open(path).map_err(|source| Error::ImageDecode {
            source_name: name.clone(),
            source,
        })?;

        Ok(Self::from_dynamic(name, &img))
    }

    /// Decode an encoded image (PNG, JPEG, ...) held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageDecode`] naming `name` if decoding fails.
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let name = name.into();

        let img = image::load_from_memory(bytes).map_err(|source| Error::ImageDecode {
            source_name: name.clone(),
            source,
        })?;

        Ok(Self::from_dynamic(name, &img))
    }

    /// Wrap already decoded pixels.
    pub fn from_rgb(name: impl Into<String>, pixels: RgbImage) -> Self {
        Self {
            name: name.into(),
            pixels: Arc::new(pixels),
        }
    }

    fn from_dynamic(name: String, img: &DynamicImage) -> Self {
        Self::from_rgb(name, img.to_rgb8())
    }

    /// Where the pixels came from (path, URL or gallery name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `(width, height)`.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    #[must_use]
    pub fn as_rgb(&self) -> &RgbImage {
        &self.pixels
    }

    /// Interleaved RGB bytes, row-major.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.pixels.as_raw()
    }

    /// Resize to `height` rows like a size slider does.
    ///
    /// The width follows the aspect ratio, or equals `height` when `square`.
    ///
    /// # Errors
    ///
    /// Returns an error if `height` is zero.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn resized(&self, height: u32, square: bool) -> Result<Self> {
        if height == 0 {
            return Err(Error::InvalidParameter {
                name: "height".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        let width = if square {
            height
        } else {
            let scale = height as f32 / self.height().max(1) as f32;
            // Safe: rounded, positive and bounded by the scaled image width
            ((self.width() as f32 * scale).round() as u32).max(1)
        };

        if (width, height) == self.dimensions() {
            return Ok(self.clone());
        }

        let pixels = image::imageops::resize(self.as_rgb(), width, height, FilterType::Triangle);
        Ok(Self::from_rgb(self.name.clone(), pixels))
    }
}
