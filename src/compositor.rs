// Mask -> overlay. Turns what the model said about each pixel into an RGBA
// highlight layer. Every function here is pure: same input, same bytes out.
// Visual: highlighted pixels show up purple over the live video; the rest stay clear.

use std::collections::BTreeSet;

use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::types::{ClassMask, ConfidenceMask, OverlayBuffer, Segmentation};

/// Purple used by both pipelines.
pub const HIGHLIGHT_RGB: [u8; 3] = [128, 0, 128];

/// Color + opacity written for every pixel that passes the policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub color: [u8; 3],
    pub alpha: u8,
}

impl Highlight {
    pub const fn purple(alpha: u8) -> Self {
        Self { color: HIGHLIGHT_RGB, alpha }
    }

    #[inline]
    fn rgba(self) -> Rgba<u8> {
        let [r, g, b] = self.color;
        Rgba([r, g, b, self.alpha])
    }
}

/// Which model output a policy reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Per-pixel class ids.
    Category,
    /// Per-class confidence maps.
    Confidence,
}

/// Class-membership rule: highlight pixels whose class id is in `targets`.
pub fn composite_classes(mask: &ClassMask, targets: &BTreeSet<u8>, highlight: Highlight) -> OverlayBuffer {
    // Fresh, fully transparent buffer. Pixels the mask data doesn't reach stay clear.
    let mut out = OverlayBuffer::new(mask.width, mask.height);
    let on = highlight.rgba();
    for (px, class) in out.pixels_mut().zip(mask.classes.iter()) {
        if targets.contains(class) {
            *px = on;
        }
    }
    out
}

/// Confidence rule: highlight pixels strictly above `threshold`.
/// Exactly at the threshold stays transparent; NaN never passes.
pub fn composite_confidence(mask: &ConfidenceMask, threshold: f32, highlight: Highlight) -> OverlayBuffer {
    let mut out = OverlayBuffer::new(mask.width, mask.height);
    let on = highlight.rgba();
    for (px, &confidence) in out.pixels_mut().zip(mask.values.iter()) {
        if confidence > threshold {
            *px = on;
        }
    }
    out
}

/// The fixed rule a pipeline uses to turn model output into an overlay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MaskPolicy {
    ClassMembership {
        targets: BTreeSet<u8>,
        highlight: Highlight,
    },
    ConfidenceThreshold {
        channel: usize,
        threshold: f32,
        highlight: Highlight,
    },
}

impl MaskPolicy {
    /// Face skin parts of a body-part model (ids 0 and 1), semi-transparent purple.
    pub fn face_parts() -> Self {
        MaskPolicy::ClassMembership {
            targets: BTreeSet::from([0, 1]),
            highlight: Highlight::purple(200),
        }
    }

    /// Hair channel of a multiclass selfie model, opaque purple above 0.3.
    pub fn hair() -> Self {
        MaskPolicy::ConfidenceThreshold {
            channel: 1,
            threshold: 0.3,
            highlight: Highlight::purple(255),
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        match self {
            MaskPolicy::ClassMembership { .. } => OutputKind::Category,
            MaskPolicy::ConfidenceThreshold { .. } => OutputKind::Confidence,
        }
    }

    /// Build this frame's overlay. `None` means the output this policy reads
    /// is absent, i.e. nothing to draw this frame.
    pub fn composite(&self, segmentation: &Segmentation) -> Option<OverlayBuffer> {
        match self {
            MaskPolicy::ClassMembership { targets, highlight } => segmentation
                .category_mask
                .as_ref()
                .map(|mask| composite_classes(mask, targets, *highlight)),
            MaskPolicy::ConfidenceThreshold { channel, threshold, highlight } => segmentation
                .confidence(*channel)
                .map(|mask| composite_confidence(mask, *threshold, *highlight)),
        }
    }
}
