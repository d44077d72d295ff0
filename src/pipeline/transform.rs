//! Applying a style vector to a content image.

use std::sync::Arc;

use crate::error::Result;
use crate::image::{ImageSource, PixelBuffer};
use crate::model::Predictor;
use crate::tensor::TensorStore;

use super::style::{normalize, StyleVector};

/// Runs the transformer network.
#[derive(Clone)]
pub struct Stylizer {
    store: TensorStore,
    transformer: Arc<dyn Predictor>,
}

impl Stylizer {
    pub fn new(store: &TensorStore, transformer: Arc<dyn Predictor>) -> Self {
        Self {
            store: store.clone(),
            transformer,
        }
    }

    /// Stylize `content` with `style`.
    ///
    /// The style vector is only borrowed; dropping it afterwards is up to the
    /// caller, which may keep it for another run.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails or the transformer output is not
    /// an RGB image.
    pub fn stylize(&self, content: &ImageSource, style: &StyleVector) -> Result<PixelBuffer> {
        let pixels = self.store.tidy(|| {
            let input = normalize(&self.store, content)?;
            let output = self
                .store
                .run(self.transformer.as_ref(), &[&input, style.tensor()])?;
            output.squeeze_axis(0)?.to_pixels()
        })?;

        tracing::debug!(
            "Stylized {} into {}x{} with {}",
            content.name(),
            pixels.width(),
            pixels.height(),
            self.transformer.name()
        );
        Ok(pixels)
    }
}
