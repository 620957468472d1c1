//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing.
//! Input frames are letterboxed into the square model input; detections are
//! mapped back to frame coordinates before being returned.

use crate::ops;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::types::BoundingBox;
use rollcall_core::vision::GrayView;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// Output tensor layout: [0..3] scores, [3..6] box deltas, [6..9] landmark
/// deltas, each ordered by stride 8/16/32.
const EXPECTED_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox geometry for mapping model-space coordinates back to the frame.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct ScrfdDetector {
    session: Session,
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        if num_outputs < EXPECTED_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires {EXPECTED_OUTPUTS} outputs (3 strides x score/bbox/kps), got {num_outputs}"
            )));
        }

        tracing::info!(path = %model_path.display(), outputs = num_outputs, "SCRFD detector loaded");
        Ok(Self { session })
    }

    /// Detect faces in a grayscale frame, highest confidence first.
    pub fn detect(&mut self, image: GrayView<'_>) -> Result<Vec<BoundingBox>, DetectorError> {
        let (tensor, letterbox) = letterbox_tensor(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let mut detections = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, deltas) = outputs[level + 3].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, points) = outputs[level + 6].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("landmarks stride {stride}: {e}"))
            })?;
            decode_level(scores, deltas, points, stride, &letterbox, &mut detections);
        }

        // nms sorts by confidence first, so the survivors come back ordered.
        Ok(nms(detections, NMS_IOU))
    }
}

/// Letterbox the frame into the square model input and produce the
/// normalized NCHW tensor. Padding stays at 0.0, which is exactly where the
/// pixel mean normalizes to.
fn letterbox_tensor(image: GrayView<'_>) -> (Array4<f32>, Letterbox) {
    let (w, h) = (image.width as usize, image.height as usize);
    let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as usize).min(INPUT_SIZE);
    let new_h = ((h as f32 * scale).round() as usize).min(INPUT_SIZE);
    let pad_x = (INPUT_SIZE - new_w) / 2;
    let pad_y = (INPUT_SIZE - new_h) / 2;

    let resized = ops::bilinear_resize(image.data, w, h, new_w, new_h);

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..new_h {
        for x in 0..new_w {
            let value = (resized[y * new_w + x] as f32 - PIXEL_MEAN) / PIXEL_STD;
            for c in 0..3 {
                tensor[[0, c, y + pad_y, x + pad_x]] = value;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Decode one stride level's anchor grid into frame-space detections.
fn decode_level(
    scores: &[f32],
    deltas: &[f32],
    points: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<BoundingBox>,
) {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;

    for idx in 0..anchors.min(scores.len()) {
        let score = scores[idx];
        if score <= SCORE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_x = ((cell % grid) * stride) as f32;
        let anchor_y = ((cell / grid) * stride) as f32;

        let d = idx * 4;
        if d + 3 >= deltas.len() {
            continue;
        }
        let s = stride as f32;
        let (x1, y1) = letterbox.to_frame(anchor_x - deltas[d] * s, anchor_y - deltas[d + 1] * s);
        let (x2, y2) =
            letterbox.to_frame(anchor_x + deltas[d + 2] * s, anchor_y + deltas[d + 3] * s);

        let k = idx * 10;
        let landmarks = if k + 9 < points.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                *lm = letterbox.to_frame(
                    anchor_x + points[k + i * 2] * s,
                    anchor_y + points[k + i * 2 + 1] * s,
                );
            }
            Some(lms)
        } else {
            None
        };

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
}

/// Non-maximum suppression, keeping the highest-confidence box per cluster.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|k| iou(k, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let left = a.x.max(b.x);
    let top = a.y.max(b.y);
    let right = (a.x + a.width).min(b.x + b.width);
    let bottom = (a.y + a.height).min(b.y + b.height);

    let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
    let union = a.width * a.height + b.width * b.height - overlap;
    if union > 0.0 {
        overlap / union
    } else {
        0.0
    }
}
