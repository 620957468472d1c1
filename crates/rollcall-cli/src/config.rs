use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, loaded from `ROLLCALL_*` environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory of enrolled face images, one per identity.
    pub faces_dir: PathBuf,
    /// Directory of daily attendance CSV logs.
    pub logs_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Integer downscale factor applied before detection in the tracking loop.
    pub downscale: u32,
    /// Frames discarded after camera open (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Bounded camera-open attempts before giving up.
    pub camera_attempts: usize,
    /// Delay between camera-open attempts.
    pub camera_retry_delay: Duration,
    /// Frames an enrollment capture may consume before it is abandoned.
    pub enroll_attempts: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            faces_dir: env_path("ROLLCALL_FACES_DIR", "known_faces"),
            logs_dir: env_path("ROLLCALL_LOGS_DIR", "attendance_logs"),
            model_dir: std::env::var("ROLLCALL_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| rollcall_vision::default_model_dir()),
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 1.10),
            downscale: env_u32("ROLLCALL_DOWNSCALE", 4),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            camera_attempts: env_usize("ROLLCALL_CAMERA_ATTEMPTS", 3),
            camera_retry_delay: Duration::from_secs(1),
            enroll_attempts: env_usize("ROLLCALL_ENROLL_ATTEMPTS", 60),
        }
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
