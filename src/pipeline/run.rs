//! Configuration and the two stylization flows.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::image::{ImageSource, PixelBuffer};
use crate::model::{OnnxLoader, Predictor, StyleModel, TransformerModel};
use crate::tensor::TensorStore;

use super::progress::{enter, Progress, Stage};
use super::style::{BlendRatio, StyleEngine};
use super::transform::Stylizer;

/// Configuration for stylization.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the ONNX model files.
    pub model_dir: PathBuf,

    /// Base URL to download missing model files from.
    pub model_url: Option<String>,

    /// Style encoder loaded at startup.
    pub style_model: StyleModel,

    /// Transformer loaded at startup.
    pub transformer_model: TransformerModel,

    /// Output JPEG quality (1-100).
    pub output_quality: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: OnnxLoader::default_dir(),
            model_url: None,
            style_model: StyleModel::default(),
            transformer_model: TransformerModel::default(),
            output_quality: 95,
        }
    }
}

impl Config {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.output_quality) {
            return Err(Error::InvalidParameter {
                name: "output_quality".to_string(),
                reason: "must be between 1 and 100".to_string(),
            });
        }

        if let Some(url) = &self.model_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::InvalidParameter {
                    name: "model_url".to_string(),
                    reason: format!("`{url}` is not an http(s) URL"),
                });
            }
        }

        Ok(())
    }
}

/// A style encoder and transformer pair sharing one tensor store.
#[derive(Clone)]
pub struct Pipeline {
    engine: StyleEngine,
    stylizer: Stylizer,
}

impl Pipeline {
    pub fn new(
        store: &TensorStore,
        encoder: Arc<dyn Predictor>,
        transformer: Arc<dyn Predictor>,
    ) -> Self {
        Self {
            engine: StyleEngine::new(store, encoder),
            stylizer: Stylizer::new(store, transformer),
        }
    }

    #[must_use]
    pub const fn engine(&self) -> &StyleEngine {
        &self.engine
    }

    #[must_use]
    pub const fn stylizer(&self) -> &Stylizer {
        &self.stylizer
    }

    /// Stylize `content` with one style image, blended with the content's own
    /// style unless `ratio` is 1.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; every tensor of the run is released.
    pub async fn stylize(
        &self,
        content: &ImageSource,
        style: &ImageSource,
        ratio: BlendRatio,
        progress: &dyn Progress,
    ) -> Result<PixelBuffer> {
        let style_vector = self
            .engine
            .blend_with_identity(style, content, ratio, progress)
            .await?;

        enter(progress, Stage::Stylizing).await;
        self.stylizer.stylize(content, &style_vector)
    }

    /// Stylize `content` with the mix of two style images.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; every tensor of the run is released.
    pub async fn combine(
        &self,
        content: &ImageSource,
        style_a: &ImageSource,
        style_b: &ImageSource,
        ratio: BlendRatio,
        progress: &dyn Progress,
    ) -> Result<PixelBuffer> {
        let style_vector = self
            .engine
            .blend_two_styles(style_a, style_b, ratio, progress)
            .await?;

        enter(progress, Stage::Stylizing).await;
        self.stylizer.stylize(content, &style_vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::NoProgress;
    use crate::testing::{gradient_image, solid_image, FailingPredictor, MockEncoder, MockTransformer, STYLE_DIMS};

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.style_model, StyleModel::MobileNet);
        assert_eq!(config.transformer_model, TransformerModel::Separable);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let config = Config {
            output_quality: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            model_url: Some("ftp://models".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_stylize_full_ratio() {
        let store = TensorStore::new();
        let encoder = MockEncoder::new(STYLE_DIMS);
        let transformer = MockTransformer::new();
        let pipeline = Pipeline::new(&store, encoder.clone(), transformer.clone());
        let content = gradient_image("content", 256, 256);
        let style = solid_image("style", 100, 150, [20, 40, 60]);

        let pixels = pipeline
            .stylize(&content, &style, BlendRatio::ONE, &NoProgress)
            .await
            .unwrap();

        assert_eq!((pixels.width(), pixels.height()), (256, 256));
        assert_eq!(pixels.channels(), 3);
        assert_eq!(encoder.calls(), 1);
        assert_eq!(transformer.calls(), 1);
        assert_eq!(store.memory().num_tensors, 0);
    }

    #[tokio::test]
    async fn test_combine_reports_stages_in_order() {
        let store = TensorStore::new();
        let pipeline = Pipeline::new(&store, MockEncoder::new(STYLE_DIMS), MockTransformer::new());
        let content = gradient_image("content", 40, 30);
        let stages = std::sync::Mutex::new(Vec::new());
        let record = |stage: Stage| stages.lock().unwrap().push(stage);

        pipeline
            .combine(
                &content,
                &solid_image("a", 10, 10, [0, 0, 0]),
                &solid_image("b", 10, 10, [255, 255, 255]),
                BlendRatio::HALF,
                &record,
            )
            .await
            .unwrap();

        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                Stage::StyleRepresentationOf(1),
                Stage::StyleRepresentationOf(2),
                Stage::Stylizing,
            ]
        );
        assert_eq!(store.memory().num_tensors, 0);
    }

    #[tokio::test]
    async fn test_failed_transformer_leaks_nothing() {
        let store = TensorStore::new();
        let pipeline = Pipeline::new(&store, MockEncoder::new(STYLE_DIMS), Arc::new(FailingPredictor));
        let content = gradient_image("content", 16, 16);
        let style = solid_image("style", 16, 16, [9, 9, 9]);

        let result = pipeline
            .stylize(&content, &style, BlendRatio::new(0.5).unwrap(), &NoProgress)
            .await;

        assert!(matches!(result, Err(Error::Inference { .. })));
        assert_eq!(store.memory().num_tensors, 0);
    }
}
