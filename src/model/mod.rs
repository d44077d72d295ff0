//! Predictors, model variants and the model cache.

mod cache;
mod loader;
mod onnx;

pub use cache::ModelCache;
pub use loader::{ModelLoader, OnnxLoader};
pub use onnx::OnnxPredictor;

pub(crate) use loader::fetch_bytes;

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayD;

use crate::error::{Error, Result};

/// A loaded inference function.
///
/// Predictors are shared read-only between jobs, so `predict` must not
/// depend on state left behind by an earlier call.
pub trait Predictor: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Run the model on `inputs` and return its first output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Inference`] if the backend fails.
    fn predict(&self, inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>>;
}

/// Style-encoder variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StyleModel {
    /// MobileNet-v2 based encoder (small, fast).
    #[default]
    MobileNet,
    /// Inception-v3 based encoder (larger, slower).
    Inception,
}

impl StyleModel {
    pub const ALL: [Self; 2] = [Self::MobileNet, Self::Inception];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MobileNet => "mobilenet",
            Self::Inception => "inception",
        }
    }
}

/// Transformer variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransformerModel {
    /// Transformer with regular convolutions.
    Original,
    /// Transformer with separable convolutions.
    #[default]
    Separable,
}

impl TransformerModel {
    pub const ALL: [Self; 2] = [Self::Original, Self::Separable];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Separable => "separable",
        }
    }
}

/// Any model the cache knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModelKind {
    Style(StyleModel),
    Transformer(TransformerModel),
}

impl ModelKind {
    pub const ALL: [Self; 4] = [
        Self::Style(StyleModel::MobileNet),
        Self::Style(StyleModel::Inception),
        Self::Transformer(TransformerModel::Original),
        Self::Transformer(TransformerModel::Separable),
    ];

    /// Get the filename for this model, relative to the model directory.
    #[must_use]
    pub const fn filename(&self) -> &'static str {
        match self {
            Self::Style(StyleModel::MobileNet) => "style_mobilenet.onnx",
            Self::Style(StyleModel::Inception) => "style_inception.onnx",
            Self::Transformer(TransformerModel::Original) => "transformer_original.onnx",
            Self::Transformer(TransformerModel::Separable) => "transformer_separable.onnx",
        }
    }

    #[must_use]
    pub const fn role(&self) -> &'static str {
        match self {
            Self::Style(_) => "style",
            Self::Transformer(_) => "transformer",
        }
    }

    #[must_use]
    pub const fn variant(&self) -> &'static str {
        match self {
            Self::Style(model) => model.as_str(),
            Self::Transformer(model) => model.as_str(),
        }
    }
}

impl From<StyleModel> for ModelKind {
    fn from(model: StyleModel) -> Self {
        Self::Style(model)
    }
}

impl From<TransformerModel> for ModelKind {
    fn from(model: TransformerModel) -> Self {
        Self::Transformer(model)
    }
}

impl fmt::Display for StyleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TransformerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.variant(), self.role())
    }
}

impl FromStr for StyleModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| unknown_variant("style model", s, &Self::ALL.map(|m| m.as_str())))
    }
}

impl FromStr for TransformerModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|model| model.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| unknown_variant("transformer model", s, &Self::ALL.map(|m| m.as_str())))
    }
}

fn unknown_variant(name: &str, value: &str, expected: &[&str]) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        reason: format!("unknown variant `{value}`, expected one of {}", expected.join(", ")),
    }
}
