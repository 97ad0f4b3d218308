//! Foreground masks for the clothing pipeline.
//!
//! Segmentation yields a batch of scored candidate masks per image; the
//! selector in [`select_mask`] reduces that batch to the single mask that is
//! composited into the engine input. Masks are packed bit grids so area,
//! union and intersection are cheap on full-resolution images.

mod grid;
mod morph;
mod select;

pub use grid::Mask;
pub use select::{select_mask, SelectionParams};

/// One scored segmentation hypothesis. Produced once per image and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskCandidate {
    pub mask: Mask,
    /// Affinity score reported by the segmentation prediction.
    pub score: f32,
}

impl MaskCandidate {
    pub fn new(mask: Mask, score: f32) -> Self {
        Self { mask, score }
    }
}
