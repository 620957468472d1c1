//! ArcFace face embedder via ONNX Runtime.
//!
//! Aligns a detected face to the canonical 112x112 landmark positions with a
//! least-squares similarity transform, then extracts an L2-normalized
//! 512-dimensional embedding.

use crate::ops;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::types::{BoundingBox, Embedding};
use rollcall_core::vision::GrayView;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5; // symmetric normalization, unlike the detector
const EMBEDDING_DIM: usize = 512;
const MODEL_VERSION: &str = "w600k_r50";

/// Canonical InsightFace landmark positions in the 112x112 crop:
/// left eye, right eye, nose, left mouth, right mouth.
const CANONICAL_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must supply them for alignment")]
    MissingLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct ArcFaceEmbedder {
    session: Session,
}

impl ArcFaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "ArcFace embedder loaded");
        Ok(Self { session })
    }

    /// Extract an embedding for one detected face.
    pub fn extract(
        &mut self,
        image: GrayView<'_>,
        face: &BoundingBox,
    ) -> Result<Embedding, EmbedderError> {
        let landmarks = face.landmarks.as_ref().ok_or(EmbedderError::MissingLandmarks)?;

        let aligned = align_crop(image, landmarks);
        let tensor = ops::gray_to_nchw(&aligned, INPUT_SIZE, PIXEL_MEAN, PIXEL_STD);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw.to_vec()),
            model_version: Some(MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|v| v / norm).collect()
    } else {
        values
    }
}

/// Similarity transform src→dst minimizing least-squares error, as
/// `(a, b, tx, ty)` for the matrix
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
/// Closed form over centered coordinates.
fn similarity_params(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> (f32, f32, f32, f32) {
    let n = src.len() as f32;
    let (mut sx_mean, mut sy_mean, mut dx_mean, mut dy_mean) = (0.0, 0.0, 0.0, 0.0);
    for i in 0..src.len() {
        sx_mean += src[i].0;
        sy_mean += src[i].1;
        dx_mean += dst[i].0;
        dy_mean += dst[i].1;
    }
    sx_mean /= n;
    sy_mean /= n;
    dx_mean /= n;
    dy_mean /= n;

    let (mut num_a, mut num_b, mut denom) = (0.0, 0.0, 0.0);
    for i in 0..src.len() {
        let sx = src[i].0 - sx_mean;
        let sy = src[i].1 - sy_mean;
        let dx = dst[i].0 - dx_mean;
        let dy = dst[i].1 - dy_mean;
        num_a += sx * dx + sy * dy;
        num_b += sx * dy - sy * dx;
        denom += sx * sx + sy * sy;
    }

    if denom.abs() < 1e-12 {
        return (1.0, 0.0, 0.0, 0.0);
    }

    let a = num_a / denom;
    let b = num_b / denom;
    let tx = dx_mean - (a * sx_mean - b * sy_mean);
    let ty = dy_mean - (b * sx_mean + a * sy_mean);
    (a, b, tx, ty)
}

/// Warp the face region into the canonical 112x112 crop via the inverse
/// similarity transform, sampling bilinearly with black fill out of bounds.
fn align_crop(image: GrayView<'_>, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let (a, b, tx, ty) = similarity_params(landmarks, &CANONICAL_LANDMARKS);

    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; INPUT_SIZE * INPUT_SIZE];
    }
    let inv = 1.0 / det;

    let (w, h) = (image.width as i32, image.height as i32);
    let sample = |x: i32, y: i32| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.data[(y * w + x) as usize] as f32
        } else {
            0.0
        }
    };

    let mut out = vec![0u8; INPUT_SIZE * INPUT_SIZE];
    for oy in 0..INPUT_SIZE {
        for ox in 0..INPUT_SIZE {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = (a * dx + b * dy) * inv;
            let sy = (a * dy - b * dx) * inv;

            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let top = sample(x0, y0) * (1.0 - fx) + sample(x0 + 1, y0) * fx;
            let bottom = sample(x0, y0 + 1) * (1.0 - fx) + sample(x0 + 1, y0 + 1) * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            out[oy * INPUT_SIZE + ox] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identity() {
        let (a, b, tx, ty) = similarity_params(&CANONICAL_LANDMARKS, &CANONICAL_LANDMARKS);
        assert!((a - 1.0).abs() < 1e-4, "a = {a}");
        assert!(b.abs() < 1e-4, "b = {b}");
        assert!(tx.abs() < 1e-3, "tx = {tx}");
        assert!(ty.abs() < 1e-3, "ty = {ty}");
    }

    #[test]
    fn test_similarity_halves_doubled_landmarks() {
        let doubled: [(f32, f32); 5] =
            std::array::from_fn(|i| (CANONICAL_LANDMARKS[i].0 * 2.0, CANONICAL_LANDMARKS[i].1 * 2.0));
        let (a, b, _, _) = similarity_params(&doubled, &CANONICAL_LANDMARKS);
        assert!((a - 0.5).abs() < 1e-4, "a = {a}");
        assert!(b.abs() < 1e-4, "b = {b}");
    }

    #[test]
    fn test_similarity_pure_translation() {
        let shifted: [(f32, f32); 5] =
            std::array::from_fn(|i| (CANONICAL_LANDMARKS[i].0 + 10.0, CANONICAL_LANDMARKS[i].1 - 5.0));
        let (a, b, tx, ty) = similarity_params(&shifted, &CANONICAL_LANDMARKS);
        assert!((a - 1.0).abs() < 1e-4);
        assert!(b.abs() < 1e-4);
        assert!((tx + 10.0).abs() < 1e-3, "tx = {tx}");
        assert!((ty - 5.0).abs() < 1e-3, "ty = {ty}");
    }

    #[test]
    fn test_align_crop_output_size() {
        let frame = vec![128u8; 640 * 480];
        let view = GrayView {
            data: &frame,
            width: 640,
            height: 480,
        };
        let aligned = align_crop(view, &CANONICAL_LANDMARKS);
        assert_eq!(aligned.len(), INPUT_SIZE * INPUT_SIZE);
    }

    #[test]
    fn test_align_crop_moves_landmark_patch() {
        // A bright patch at the source left-eye position should land near the
        // canonical left-eye position after alignment.
        let (w, h) = (200usize, 200usize);
        let mut frame = vec![0u8; w * h];
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5usize {
            for dx in 0..5usize {
                let px = src[0].0 as usize - 2 + dx;
                let py = src[0].1 as usize - 2 + dy;
                frame[py * w + px] = 255;
            }
        }

        let view = GrayView {
            data: &frame,
            width: w as u32,
            height: h as u32,
        };
        let aligned = align_crop(view, &src);

        let cx = CANONICAL_LANDMARKS[0].0.round() as usize;
        let cy = CANONICAL_LANDMARKS[0].1.round() as usize;
        let mut brightest = 0u8;
        for dy in 0..3usize {
            for dx in 0..3usize {
                let x = cx - 1 + dx;
                let y = cy - 1 + dy;
                if x < INPUT_SIZE && y < INPUT_SIZE {
                    brightest = brightest.max(aligned[y * INPUT_SIZE + x]);
                }
            }
        }
        assert!(brightest > 100, "expected bright patch near ({cx}, {cy})");
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let out = l2_normalize(vec![3.0, 4.0]);
        let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((out[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector_untouched() {
        let out = l2_normalize(vec![0.0, 0.0]);
        assert_eq!(out, vec![0.0, 0.0]);
    }
}
