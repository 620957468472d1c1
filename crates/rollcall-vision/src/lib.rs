//! rollcall-vision — Face detection and embedding extraction.
//!
//! Implements the core's [`FaceVision`] seam with SCRFD detection and
//! ArcFace embeddings, both running via ONNX Runtime on the CPU.

pub mod detector;
pub mod embedder;
mod ops;

pub use detector::{DetectorError, ScrfdDetector};
pub use embedder::{ArcFaceEmbedder, EmbedderError};

use rollcall_core::types::{BoundingBox, Embedding};
use rollcall_core::vision::{FaceVision, GrayView, VisionError};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DETECTOR_MODEL: &str = "det_10g.onnx";
const EMBEDDER_MODEL: &str = "w600k_r50.onnx";

#[derive(Debug, Error)]
pub enum VisionLoadError {
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

/// ONNX-backed vision pipeline: one detector, one embedder.
pub struct OnnxVision {
    detector: ScrfdDetector,
    embedder: ArcFaceEmbedder,
}

impl OnnxVision {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, VisionLoadError> {
        Ok(Self {
            detector: ScrfdDetector::load(&model_dir.join(DETECTOR_MODEL))?,
            embedder: ArcFaceEmbedder::load(&model_dir.join(EMBEDDER_MODEL))?,
        })
    }
}

impl FaceVision for OnnxVision {
    fn detect(&mut self, image: GrayView<'_>) -> Result<Vec<BoundingBox>, VisionError> {
        self.detector
            .detect(image)
            .map_err(|e| VisionError::Detect(e.to_string()))
    }

    fn embed(&mut self, image: GrayView<'_>, face: &BoundingBox) -> Result<Embedding, VisionError> {
        self.embedder
            .extract(image, face)
            .map_err(|e| VisionError::Embed(e.to_string()))
    }
}

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`, falling back to
/// `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
