//! Test doubles for predictors and loaders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::image::ImageSource;
use crate::model::{ModelKind, ModelLoader, Predictor, StyleModel, TransformerModel};

pub const STYLE_DIMS: usize = 100;

/// Style encoder whose vector depends on the mean brightness of its input.
pub struct MockEncoder {
    dims: usize,
    calls: AtomicUsize,
}

impl MockEncoder {
    pub fn new(dims: usize) -> Arc<Self> {
        Arc::new(Self {
            dims,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for MockEncoder {
    fn name(&self) -> &str {
        "mock encoder"
    }

    #[allow(clippy::cast_precision_loss)]
    fn predict(&self, inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let image = &inputs[0];
        assert_eq!(image.ndim(), 4, "encoder expects a batched image");

        let mean = image.mean().unwrap_or(0.0);
        let values = (0..self.dims).map(|i| mean + i as f32 * 0.01).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&[1, 1, 1, self.dims]), values).unwrap())
    }
}

/// Transformer that stretches the content contrast well past [0, 1] and
/// nudges it by the style vector's mean.
pub struct MockTransformer {
    calls: AtomicUsize,
}

impl MockTransformer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Predictor for MockTransformer {
    fn name(&self) -> &str {
        "mock transformer"
    }

    fn predict(&self, inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let [content, style] = inputs else {
            panic!("transformer expects content and style");
        };
        let shift = style.mean().unwrap_or(0.0);
        Ok(content * 3.0 - 1.0 + shift * 0.001)
    }
}

/// Predictor that always fails like a lost backend.
pub struct FailingPredictor;

impl Predictor for FailingPredictor {
    fn name(&self) -> &str {
        "failing"
    }

    fn predict(&self, _inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        Err(Error::Inference {
            model: self.name().to_string(),
            source: "backend context lost".into(),
        })
    }
}

/// Predictor returning a fixed array regardless of input.
pub struct ConstPredictor(pub ArrayD<f32>);

impl Predictor for ConstPredictor {
    fn name(&self) -> &str {
        "const"
    }

    fn predict(&self, _inputs: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
        Ok(self.0.clone())
    }
}

/// In-memory loader that counts loads and fails for unknown kinds.
pub struct MapLoader {
    predictors: HashMap<ModelKind, Arc<dyn Predictor>>,
    loads: Arc<AtomicUsize>,
}

impl MapLoader {
    pub fn complete() -> Self {
        let mut predictors: HashMap<ModelKind, Arc<dyn Predictor>> = HashMap::new();
        for model in StyleModel::ALL {
            predictors.insert(model.into(), MockEncoder::new(STYLE_DIMS));
        }
        for model in TransformerModel::ALL {
            predictors.insert(model.into(), MockTransformer::new());
        }
        Self {
            predictors,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(mut self, kind: ModelKind, predictor: Arc<dyn Predictor>) -> Self {
        self.predictors.insert(kind, predictor);
        self
    }

    pub fn without(mut self, kind: ModelKind) -> Self {
        self.predictors.remove(&kind);
        self
    }

    pub fn load_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl ModelLoader for MapLoader {
    fn load(&self, kind: ModelKind) -> Result<Arc<dyn Predictor>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.predictors
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::ModelLoad {
                name: kind.to_string(),
                source: "malformed model manifest".into(),
            })
    }
}

pub fn solid_image(name: &str, width: u32, height: u32, rgb: [u8; 3]) -> ImageSource {
    ImageSource::from_rgb(name, RgbImage::from_pixel(width, height, Rgb(rgb)))
}

#[allow(clippy::cast_possible_truncation)]
pub fn gradient_image(name: &str, width: u32, height: u32) -> ImageSource {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    ImageSource::from_rgb(name, image)
}

pub fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() < 1e-5, "element {i}: {a} != {e}");
    }
}
