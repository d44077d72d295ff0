//! Slider and checkbox state of a panel.

use rand::Rng;

use crate::error::Result;
use crate::image::ImageSource;
use crate::pipeline::BlendRatio;

/// Content size slider range.
pub const CONTENT_SIZES: std::ops::RangeInclusive<u32> = 256..=400;

/// Style size slider range.
pub const STYLE_SIZES: std::ops::RangeInclusive<u32> = 100..=400;

/// Which style image of a panel. The single panel only has `First`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleSlot {
    First,
    Second,
}

impl StyleSlot {
    const fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

/// Size slider and square checkbox of one style image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StyleSizing {
    /// New height; `None` keeps the source size.
    pub size: Option<u32>,
    pub square: bool,
}

impl StyleSizing {
    fn randomize<R: Rng>(&mut self, rng: &mut R) {
        self.size = Some(rng.random_range(STYLE_SIZES));
        if rng.random_bool(0.5) {
            self.square = !self.square;
        }
    }

    fn apply(self, image: &ImageSource) -> Result<ImageSource> {
        match (self.size, self.square) {
            (Some(height), square) => image.resized(height, square),
            (None, true) => image.resized(image.height(), true),
            (None, false) => Ok(image.clone()),
        }
    }
}

/// Settings of one panel. A content size of `None` keeps the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelSettings {
    pub ratio: BlendRatio,
    pub content_size: Option<u32>,
    pub styles: [StyleSizing; 2],
}

impl PanelSettings {
    /// Single-style panel: the style image alone.
    #[must_use]
    pub const fn single() -> Self {
        Self {
            ratio: BlendRatio::ONE,
            content_size: None,
            styles: [
                StyleSizing {
                    size: None,
                    square: false,
                },
                StyleSizing {
                    size: None,
                    square: false,
                },
            ],
        }
    }

    /// Combine panel: both styles equally.
    #[must_use]
    pub const fn combine() -> Self {
        Self {
            ratio: BlendRatio::HALF,
            ..Self::single()
        }
    }

    #[must_use]
    pub const fn style(&self, slot: StyleSlot) -> &StyleSizing {
        &self.styles[slot.index()]
    }

    pub fn style_mut(&mut self, slot: StyleSlot) -> &mut StyleSizing {
        &mut self.styles[slot.index()]
    }

    /// Shake every slider and flip each square checkbox half of the time.
    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        let percent: u8 = rng.random_range(0..=100);
        if let Ok(ratio) = BlendRatio::from_percent(percent) {
            self.ratio = ratio;
        }
        self.content_size = Some(rng.random_range(CONTENT_SIZES));
        for style in &mut self.styles {
            style.randomize(rng);
        }
    }

    /// # Errors
    ///
    /// Returns an error if the configured size is zero.
    pub fn prepare_content(&self, image: &ImageSource) -> Result<ImageSource> {
        match self.content_size {
            Some(height) => image.resized(height, false),
            None => Ok(image.clone()),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the configured size is zero.
    pub fn prepare_style(&self, slot: StyleSlot, image: &ImageSource) -> Result<ImageSource> {
        self.style(slot).apply(image)
    }
}
