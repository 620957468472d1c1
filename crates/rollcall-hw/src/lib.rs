//! rollcall-hw — Webcam capture for the attendance loop.
//!
//! V4L2-based camera access: bounded-retry open, a streaming capture session
//! for the session loop's lifetime, and grayscale frame handling.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CaptureSession, DeviceInfo, PixelFormat};
pub use frame::Frame;
