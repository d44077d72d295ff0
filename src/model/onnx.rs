//! ONNX Runtime predictor.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ndarray::{ArrayD, IxDyn};
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};

use super::Predictor;

/// A predictor backed by an ONNX Runtime session.
///
/// `ort` needs exclusive access to run a session, so concurrent callers take
/// turns on the mutex.
pub struct OnnxPredictor {
    name: String,
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxPredictor").field("name", &self.name).finish_non_exhaustive()
    }
}

impl OnnxPredictor {
    /// Load an ONNX model session.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load(name: impl Into<String>, path: &Path) -> Result<Self> {
        let name = name.into();

        let session = Session::builder()
            .and_then(|builder| builder.commit_from_file(path))
            .map_err(|source| Error::ModelLoad {
                name: name.clone(),
                source: source.into(),
            })?;

        Ok(Self {
            name,
            session: Mutex::new(session),
        })
    }

    fn inference_error(&self, source: ort::Error) -> Error {
        Error::Inference {
            model: self.name.clone(),
            source: source.into(),
        }
    }
}

impl Predictor for OnnxPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    fn predict(&self, inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        let mut values = inputs
            .iter()
            .map(|array| Tensor::from_array(array.clone()).map_err(|source| self.inference_error(source)))
            .collect::<Result<Vec<_>>>()?
            .into_iter();

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        // Style encoders take the image; transformers take the image and the style vector.
        let outputs = match (values.next(), values.next(), values.next()) {
            (Some(image), None, None) => session.run(ort::inputs![image]),
            (Some(image), Some(style), None) => session.run(ort::inputs![image, style]),
            _ => {
                return Err(Error::InvalidParameter {
                    name: "inputs".to_string(),
                    reason: format!("{} takes one or two inputs, got {}", self.name, inputs.len()),
                })
            }
        }
        .map_err(|source| self.inference_error(source))?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: format!("{} output", self.name),
                actual: "no output".to_string(),
            })?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|source| self.inference_error(source))?;

        // Safe: tensor dimensions are always non-negative and within bounds
        let dims: Vec<usize> = shape.iter().map(|&x| x as usize).collect();

        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: format!("{} values", data.len()),
        })
    }
}
