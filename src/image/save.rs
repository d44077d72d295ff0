//! Stylized output pixels and saving them.

use std::path::Path;

use image::RgbImage;

use crate::error::{Error, Result};

use super::RGB_CHANNELS;

/// Drawable RGB8 output of a stylization job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    image: RgbImage,
}

impl PixelBuffer {
    pub(crate) const fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub const fn channels(&self) -> usize {
        RGB_CHANNELS
    }

    /// Interleaved RGB bytes, row-major.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }

    #[must_use]
    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Save the pixels to `path` (format inferred from extension).
    ///
    /// # Arguments
    ///
    /// * `path` - Output file path
    /// * `quality` - JPEG quality (1-100), ignored for other formats
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be saved.
    pub fn save<P: AsRef<Path>>(&self, path: P, quality: u8) -> Result<()> {
        let path = path.as_ref();

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_lowercase();

        match extension.as_str() {
            "jpg" | "jpeg" => {
                let mut output = std::fs::File::create(path)?;
                let encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
                self.image
                    .write_with_encoder(encoder)
                    .map_err(|source| Error::ImageSave {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
            _ => {
                self.image.save(path).map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
            }
        }

        tracing::info!("Saved {}x{} image to {}", self.width(), self.height(), path.display());
        Ok(())
    }
}
