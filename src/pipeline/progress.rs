//! Stage reporting and the suspension point between stages.

use std::fmt;

/// A pipeline stage, reported before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Encoding the style image.
    StyleRepresentation,
    /// Encoding the content image to blend with its own style.
    IdentityRepresentation,
    /// Encoding the n-th (1-based) of two style images.
    StyleRepresentationOf(u8),
    /// Running the transformer.
    Stylizing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StyleRepresentation => f.write_str("Generating 100D style representation"),
            Self::IdentityRepresentation => {
                f.write_str("Generating 100D identity style representation")
            }
            Self::StyleRepresentationOf(n) => {
                write!(f, "Generating 100D style representation of image {n}")
            }
            Self::Stylizing => f.write_str("Stylizing image..."),
        }
    }
}

/// Receives stage boundaries, e.g. to update a progress label.
pub trait Progress {
    fn stage(&self, stage: Stage);
}

/// Ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn stage(&self, _stage: Stage) {}
}

impl<F: Fn(Stage)> Progress for F {
    fn stage(&self, stage: Stage) {
        self(stage);
    }
}

/// Report `stage`, then yield so observers can repaint before the stage's
/// blocking inference starts.
pub(crate) async fn enter(progress: &dyn Progress, stage: Stage) {
    tracing::debug!("{stage}");
    progress.stage(stage);
    tokio::task::yield_now().await;
}
