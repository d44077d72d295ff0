//! # stylemix
//!
//! Arbitrary neural style transfer with ONNX models.
//!
//! A style encoder turns a style image into a 100-dimensional style vector;
//! a transformer network applies such a vector to a content image. Vectors
//! can be interpolated, either with the content image's own style to tune
//! stylization strength, or with a second style image to mix two styles.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stylemix::controller::JobController;
//! use stylemix::image::ImageSource;
//! use stylemix::model::ModelCache;
//! use stylemix::pipeline::{BlendRatio, Config};
//!
//! # fn main() -> stylemix::Result<()> {
//! let config = Config::default();
//! let controller = JobController::new(Arc::new(ModelCache::from_config(&config)?));
//! controller.initialize(config.style_model, config.transformer_model)?;
//!
//! let content = ImageSource::open("content.jpg")?;
//! let style = ImageSource::open("style.jpg")?;
//! let runtime = tokio::runtime::Builder::new_current_thread().build()?;
//! let outcome = runtime.block_on(controller.stylize(&content, &style, BlendRatio::new(0.8)?))?;
//!
//! if let Some(pixels) = outcome.completed() {
//!     pixels.save("stylized.jpg", config.output_quality)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod bench;
pub mod controller;
pub mod error;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod tensor;

#[cfg(test)]
mod testing;

pub use controller::{JobController, JobOutcome};
pub use error::{Error, Result};
pub use pipeline::{BlendRatio, Config, Pipeline};
