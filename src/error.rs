//! Custom error types for stylemix.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error produced by a pluggable predictor or model loader.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the stylemix library.
#[derive(Error, Debug)]
pub enum Error {
    /// An image source could not be decoded.
    #[error("error loading {source_name}: {source}")]
    ImageDecode {
        source_name: String,
        #[source]
        source: image::ImageError,
    },

    /// Failed to save an image file.
    #[error("failed to save image to {path}: {source}")]
    ImageSave {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Failed to download a model or an image.
    #[error("failed to download {name}: {source}")]
    Download {
        name: String,
        #[source]
        source: reqwest::Error,
    },

    /// Failed to fetch or deserialize a predictor.
    #[error("failed to load model {name}: {source}")]
    ModelLoad {
        name: String,
        #[source]
        source: BoxError,
    },

    /// A job needed a predictor that was never loaded.
    #[error("no {role} model is loaded")]
    ModelNotLoaded { role: &'static str },

    /// Model inference failed.
    #[error("inference failed in {model}: {source}")]
    Inference {
        model: String,
        #[source]
        source: BoxError,
    },

    /// Shape mismatch in tensor operations.
    #[error("tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// A tensor was read after its buffer had been released.
    #[error("tensor {id} is disposed")]
    TensorDisposed { id: u64 },

    /// Failed to create cache directory.
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid parameter value.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}

/// Result type alias for stylemix operations.
pub type Result<T> = std::result::Result<T, Error>;
