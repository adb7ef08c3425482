// Core types that flow through one loop iteration:
// camera Frame -> model Segmentation -> OverlayBuffer -> screen FrameBuffer.

use image::{RgbImage, RgbaImage};

/// One camera snapshot. Lives for a single loop iteration.
pub type Frame = RgbImage;

/// RGBA highlight layer, same pixel count as the mask it was built from.
/// Transparent pixels are (0,0,0,0).
pub type OverlayBuffer = RgbaImage;

/// Class id for pixels that no class claims (e.g. background under the threshold).
pub const UNLABELED: u8 = u8::MAX;

#[derive(Clone)]
pub struct FrameBuffer {
    pub width: usize,      // how wide the surface is (pixels)
    pub height: usize,     // how tall the surface is (pixels)
    pub pixels: Vec<u32>,  // each entry is 0x00RRGGBB for minifb
}

impl FrameBuffer {
    /// A black surface of the given size.
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height, pixels: vec![0u32; width * height] }
    }
}

/// Strictly increasing counter handed to the model with every call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameToken(pub u64);

impl FrameToken {
    pub const FIRST: FrameToken = FrameToken(1);

    pub fn next(self) -> FrameToken {
        FrameToken(self.0 + 1)
    }
}

/// Per-pixel most likely class id.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassMask {
    pub width: u32,
    pub height: u32,
    pub classes: Vec<u8>, // length = width * height
}

/// Per-pixel confidence in [0,1] for a single class.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceMask {
    pub width: u32,
    pub height: u32,
    pub values: Vec<f32>, // length = width * height
}

/// What the model hands back for one frame. Either part may be missing,
/// depending on the requested output kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segmentation {
    pub category_mask: Option<ClassMask>,
    pub confidence_masks: Vec<ConfidenceMask>,
}

impl Segmentation {
    pub fn from_classes(mask: ClassMask) -> Self {
        Self { category_mask: Some(mask), confidence_masks: Vec::new() }
    }

    pub fn from_confidences(masks: Vec<ConfidenceMask>) -> Self {
        Self { category_mask: None, confidence_masks: masks }
    }

    /// Confidence mask for class `channel`, if the model produced it.
    pub fn confidence(&self, channel: usize) -> Option<&ConfidenceMask> {
        self.confidence_masks.get(channel)
    }
}
