//! Style encoding, interpolation and stylization.

mod progress;
mod run;
mod style;
mod transform;

pub use progress::{NoProgress, Progress, Stage};
pub use run::{Config, Pipeline};
pub use style::{BlendRatio, StyleEngine, StyleVector};
pub use transform::Stylizer;
