//! Grayscale frame type and conversions.

use thiserror::Error;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Row-major luma data, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
}

impl Frame {
    /// Shrink by an integer factor with nearest-neighbor sampling. Detection
    /// runs on the shrunk frame; a factor of 4 keeps the loop responsive on
    /// CPU without losing faces at webcam distances.
    pub fn downscale(&self, factor: u32) -> Frame {
        let factor = factor.max(1);
        let out_w = (self.width / factor).max(1);
        let out_h = (self.height / factor).max(1);

        let mut data = Vec::with_capacity((out_w * out_h) as usize);
        for y in 0..out_h {
            let src_row = (y * factor * self.width) as usize;
            for x in 0..out_w {
                data.push(self.data[src_row + (x * factor) as usize]);
            }
        }

        Frame {
            data,
            width: out_w,
            height: out_h,
            sequence: self.sequence,
        }
    }

    /// Extract a rectangular region, clamped to the frame bounds.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Frame {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let x1 = x.saturating_add(w).min(self.width);
        let y1 = y.saturating_add(h).min(self.height);
        let out_w = x1 - x0;
        let out_h = y1 - y0;

        let mut data = Vec::with_capacity((out_w * out_h) as usize);
        for row in y0..y1 {
            let start = (row * self.width + x0) as usize;
            data.extend_from_slice(&self.data[start..start + out_w as usize]);
        }

        Frame {
            data,
            width: out_w,
            height: out_h,
            sequence: self.sequence,
        }
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; luma is every
/// even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
