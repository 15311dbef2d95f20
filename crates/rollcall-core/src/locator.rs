//! Face location and framing checks.

use crate::capability::{CapabilityError, FaceDetector};
use crate::types::{FaceRegion, PercentBox, PixelBuffer};
use serde::Serialize;

/// Faces must start at or after this percentage of the frame, and end at or
/// before `100 - FRAME_MARGIN_PCT`, to count as well framed.
pub const FRAME_MARGIN_PCT: f64 = 10.0;

/// Runs a [`FaceDetector`] over the luminance projection of a buffer.
pub struct FaceLocator;

impl FaceLocator {
    /// Locate faces in `image`. Coordinates are in `image` pixel space.
    ///
    /// Zero regions is a valid result. The first region is treated as the
    /// primary face by convention only; order is detector-defined.
    pub fn locate(
        detector: &mut dyn FaceDetector,
        image: &PixelBuffer,
    ) -> Result<Vec<FaceRegion>, CapabilityError> {
        let gray = image.luminance();
        let faces = detector.detect(&gray, image.width(), image.height())?;
        let (kept, dropped): (Vec<_>, Vec<_>) = faces
            .into_iter()
            .partition(|f| f.width > 0.0 && f.height > 0.0);
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "discarded degenerate face regions");
        }
        Ok(kept)
    }
}

/// Detection-only summary of an image: how many faces, and whether the
/// primary one is well framed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Framing {
    pub face_detected: bool,
    pub face_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<PercentBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_of_range: Option<bool>,
}

impl Framing {
    pub fn assess(image_width: u32, image_height: u32, faces: &[FaceRegion]) -> Self {
        let primary = faces.first().map(|f| f.to_percent(image_width, image_height));
        Self {
            face_detected: !faces.is_empty(),
            face_count: faces.len(),
            bounding_box: primary,
            out_of_range: primary.as_ref().map(is_out_of_range),
        }
    }
}

/// A box is out of range when it starts inside the leading margin or
/// extends past the trailing margin on either axis. Boundaries are inclusive.
pub fn is_out_of_range(pct: &PercentBox) -> bool {
    let far = 100.0 - FRAME_MARGIN_PCT;
    pct.x < FRAME_MARGIN_PCT || pct.y < FRAME_MARGIN_PCT || pct.right() > far || pct.bottom() > far
}
