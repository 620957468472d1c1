//! Shared pixel ops for model preprocessing.

use ndarray::Array4;

/// Resize a grayscale image with bilinear interpolation.
pub fn bilinear_resize(
    gray: &[u8],
    width: usize,
    height: usize,
    out_width: usize,
    out_height: usize,
) -> Vec<u8> {
    if width == 0 || height == 0 || out_width == 0 || out_height == 0 {
        return vec![0u8; out_width * out_height];
    }

    let x_ratio = width as f32 / out_width as f32;
    let y_ratio = height as f32 / out_height as f32;
    let mut out = vec![0u8; out_width * out_height];

    for oy in 0..out_height {
        let sy = (oy as f32 + 0.5) * y_ratio - 0.5;
        let y0 = (sy.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (sy - sy.floor()).clamp(0.0, 1.0);

        for ox in 0..out_width {
            let sx = (ox as f32 + 0.5) * x_ratio - 0.5;
            let x0 = (sx.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (sx - sx.floor()).clamp(0.0, 1.0);

            let top = lerp(gray[y0 * width + x0], gray[y0 * width + x1], fx);
            let bottom = lerp(gray[y1 * width + x0], gray[y1 * width + x1], fx);
            out[oy * out_width + ox] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

fn lerp(a: u8, b: u8, t: f32) -> f32 {
    a as f32 + (b as f32 - a as f32) * t
}

/// Pack a square grayscale crop into a normalized NCHW float tensor, with
/// the luma value replicated across all three channels.
pub fn gray_to_nchw(gray: &[u8], size: usize, mean: f32, std: f32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for y in 0..size {
        for x in 0..size {
            let pixel = gray.get(y * size + x).copied().unwrap_or(0) as f32;
            let value = (pixel - mean) / std;
            for c in 0..3 {
                tensor[[0, c, y, x]] = value;
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let gray = vec![90u8; 40 * 30];
        let out = bilinear_resize(&gray, 40, 30, 80, 60);
        assert_eq!(out.len(), 80 * 60);
        assert!(out.iter().all(|&p| p == 90));
    }

    #[test]
    fn test_resize_identity() {
        let gray: Vec<u8> = (0..16).collect();
        let out = bilinear_resize(&gray, 4, 4, 4, 4);
        assert_eq!(out, gray);
    }

    #[test]
    fn test_nchw_shape_and_channels() {
        let gray = vec![128u8; 8 * 8];
        let tensor = gray_to_nchw(&gray, 8, 127.5, 128.0);
        assert_eq!(tensor.shape(), &[1, 3, 8, 8]);
        let expected = (128.0 - 127.5) / 128.0;
        for c in 0..3 {
            assert!((tensor[[0, c, 3, 3]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_nchw_short_buffer_pads_zero_pixels() {
        let gray = vec![200u8; 4]; // shorter than 4x4
        let tensor = gray_to_nchw(&gray, 4, 127.5, 128.0);
        let pad = (0.0 - 127.5) / 128.0;
        assert!((tensor[[0, 0, 3, 3]] - pad).abs() < 1e-6);
    }
}
