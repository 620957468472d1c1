//! Seam to the external face-recognition capability.
//!
//! The core never runs inference itself: everything it needs from a vision
//! library is face detection and embedding extraction. Distance and the
//! boolean match decision live on [`Embedding`](crate::types::Embedding).

use crate::types::{BoundingBox, Embedding};
use thiserror::Error;

/// Borrowed 8-bit grayscale image handed across the vision seam.
#[derive(Debug, Clone, Copy)]
pub struct GrayView<'a> {
    /// Row-major luma bytes, `width * height` long.
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("face detection failed: {0}")]
    Detect(String),
    #[error("embedding extraction failed: {0}")]
    Embed(String),
}

/// Face detection and embedding extraction, implemented by a backend crate.
pub trait FaceVision {
    /// Detect faces in the image, best detection first.
    fn detect(&mut self, image: GrayView<'_>) -> Result<Vec<BoundingBox>, VisionError>;

    /// Extract an embedding for one detected face.
    fn embed(&mut self, image: GrayView<'_>, face: &BoundingBox) -> Result<Embedding, VisionError>;
}
