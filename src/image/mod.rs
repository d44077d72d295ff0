//! Image sources, gallery selection and output buffers.

mod gallery;
mod load;
mod save;

pub use gallery::{Gallery, Selection};
pub use load::ImageSource;
pub use save::PixelBuffer;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
