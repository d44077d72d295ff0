//! Style vectors: encoding images and interpolating between styles.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::image::ImageSource;
use crate::model::Predictor;
use crate::tensor::{Tensor, TensorId, TensorStore, Tracked};

use super::progress::{enter, Progress, Stage};

/// Interpolation weight in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct BlendRatio(f32);

impl BlendRatio {
    pub const ZERO: Self = Self(0.0);
    pub const HALF: Self = Self(0.5);
    pub const ONE: Self = Self(1.0);

    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] unless `value` is in [0, 1].
    pub fn new(value: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::InvalidParameter {
                name: "ratio".to_string(),
                reason: format!("{value} is not between 0.0 and 1.0"),
            });
        }
        Ok(Self(value))
    }

    /// Ratio from a 0-100 slider position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `percent` exceeds 100.
    pub fn from_percent(percent: u8) -> Result<Self> {
        Self::new(f32::from(percent) / 100.0)
    }

    #[must_use]
    pub const fn value(self) -> f32 {
        self.0
    }

    /// `1 - ratio`.
    #[must_use]
    pub fn complement(self) -> f32 {
        1.0 - self.0
    }

    /// Exactly 1.0, i.e. the style image alone.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn is_full(self) -> bool {
        self.0 == 1.0
    }
}

impl TryFrom<f32> for BlendRatio {
    type Error = Error;

    fn try_from(value: f32) -> Result<Self> {
        Self::new(value)
    }
}

/// Fixed-size style embedding produced by a style encoder.
///
/// The buffer is released when the vector is dropped. Vectors are never
/// modified; mixing consumes the operands and returns a new vector.
#[derive(Debug)]
pub struct StyleVector {
    tensor: Tensor,
}

impl StyleVector {
    const fn new(tensor: Tensor) -> Self {
        Self { tensor }
    }

    /// Shape as produced by the encoder, e.g. `[1, 1, 1, 100]`.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    /// Number of dimensions of the embedding.
    #[must_use]
    pub fn dims(&self) -> usize {
        self.tensor.len()
    }

    /// # Errors
    ///
    /// Returns an error if the buffer was released by an enclosing scope.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.tensor.to_vec()
    }

    pub(crate) const fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// `self * weight + other * other_weight`, elementwise.
    ///
    /// Both operands are released, even on error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the vectors differ in shape.
    pub fn mix(self, weight: f32, other: Self, other_weight: f32) -> Result<Self> {
        let store = self.tensor.store();
        let mixed = store.tidy(|| {
            let scaled = self.tensor.mul_scalar(weight)?;
            let other_scaled = other.tensor.mul_scalar(other_weight)?;
            scaled.add_strict(&other_scaled)
        })?;
        Ok(Self::new(mixed))
    }
}

impl Drop for StyleVector {
    fn drop(&mut self) {
        self.tensor.dispose();
    }
}

impl Tracked for StyleVector {
    fn tensor_ids(&self, ids: &mut Vec<TensorId>) {
        ids.push(self.tensor.id());
    }
}

/// Scale pixels to [0, 1] and add a batch dimension.
pub(crate) fn normalize(store: &TensorStore, image: &ImageSource) -> Result<Tensor> {
    store.alloc_pixels(image)?.div_scalar(255.0)?.expand_dims(0)
}

/// Turns style images into style vectors.
#[derive(Clone)]
pub struct StyleEngine {
    store: TensorStore,
    encoder: Arc<dyn Predictor>,
}

impl StyleEngine {
    pub fn new(store: &TensorStore, encoder: Arc<dyn Predictor>) -> Self {
        Self {
            store: store.clone(),
            encoder,
        }
    }

    /// Run the style encoder on `image`.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    pub fn encode(&self, image: &ImageSource) -> Result<StyleVector> {
        let output = self.store.tidy(|| {
            let input = normalize(&self.store, image)?;
            self.store.run(self.encoder.as_ref(), &[&input])
        })?;

        tracing::debug!(
            "Encoded {} with {} into {:?}",
            image.name(),
            self.encoder.name(),
            output.shape()
        );
        Ok(StyleVector::new(output))
    }

    /// `encode(style) * ratio + encode(content) * (1 - ratio)`.
    ///
    /// With `ratio == 1` the content image is never encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if either encoding fails.
    pub async fn blend_with_identity(
        &self,
        style: &ImageSource,
        content: &ImageSource,
        ratio: BlendRatio,
        progress: &dyn Progress,
    ) -> Result<StyleVector> {
        enter(progress, Stage::StyleRepresentation).await;
        let style_vector = self.encode(style)?;
        if ratio.is_full() {
            return Ok(style_vector);
        }

        enter(progress, Stage::IdentityRepresentation).await;
        let identity = self.encode(content)?;

        style_vector.mix(ratio.value(), identity, ratio.complement())
    }

    /// `encode(a) * (1 - ratio) + encode(b) * ratio`.
    ///
    /// Ratio 0 yields `a`'s style, ratio 1 yields `b`'s.
    ///
    /// # Errors
    ///
    /// Returns an error if either encoding fails.
    pub async fn blend_two_styles(
        &self,
        a: &ImageSource,
        b: &ImageSource,
        ratio: BlendRatio,
        progress: &dyn Progress,
    ) -> Result<StyleVector> {
        enter(progress, Stage::StyleRepresentationOf(1)).await;
        let first = self.encode(a)?;

        enter(progress, Stage::StyleRepresentationOf(2)).await;
        let second = self.encode(b)?;

        first.mix(ratio.complement(), second, ratio.value())
    }
}
