//! Session engine.
//!
//! Owns the camera, the vision backend and the session controller on a
//! dedicated OS thread; the async shell talks to it over channels. One tick
//! per captured frame: downscale, detect, embed, feed the controller, forward
//! its effects as events.

use crate::config::Config;
use anyhow::{Context, Result};
use chrono::Local;
use rollcall_core::catalog::{self, Catalog};
use rollcall_core::ledger::SessionSummary;
use rollcall_core::session::{enrollment_candidate, Effect, Phase, SessionController};
use rollcall_core::types::{BoundingBox, Detection};
use rollcall_core::vision::{FaceVision, GrayView};
use rollcall_hw::{Camera, Frame};
use rollcall_vision::OnnxVision;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Requests from the interactive shell to the engine thread.
pub enum EngineCommand {
    /// Pause recognition and capture a reference image for a new identity.
    Enroll { name: String },
    CancelEnroll,
    Stop,
}

/// What the engine reports back for rendering.
pub enum EngineEvent {
    Status(String),
    StatusCleared,
    Recorded { name: String },
    Enrolled { name: String, image: PathBuf },
    EnrollAborted { name: String, reason: String },
    /// Surfaced but non-fatal (e.g., a log write failure).
    Error(String),
    /// The session cannot run (camera unavailable). No `Ended` will follow.
    Fatal(String),
    Ended { summary: SessionSummary, log_path: PathBuf },
}

/// Spawn the session loop on a dedicated OS thread and return its channels.
pub fn spawn(
    cfg: Config,
    controller: SessionController,
    vision: OnnxVision,
) -> (mpsc::Sender<EngineCommand>, mpsc::Receiver<EngineEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (event_tx, event_rx) = mpsc::channel(64);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || run_session(cfg, controller, vision, cmd_rx, event_tx))
        .expect("failed to spawn engine thread");

    (cmd_tx, event_rx)
}

fn run_session(
    cfg: Config,
    mut controller: SessionController,
    mut vision: OnnxVision,
    mut commands: mpsc::Receiver<EngineCommand>,
    events: mpsc::Sender<EngineEvent>,
) {
    let camera = match Camera::open_with_retry(
        &cfg.camera_device,
        cfg.camera_attempts,
        cfg.camera_retry_delay,
    ) {
        Ok(camera) => camera,
        Err(e) => {
            emit(&events, EngineEvent::Fatal(e.to_string()));
            return;
        }
    };
    let mut capture = match camera.stream() {
        Ok(capture) => capture,
        Err(e) => {
            emit(&events, EngineEvent::Fatal(e.to_string()));
            return;
        }
    };
    capture.discard_warmup(cfg.warmup_frames);
    tracing::info!(device = %cfg.camera_device, "engine streaming");

    let mut enroll_budget = 0usize;

    'session: loop {
        while let Ok(cmd) = commands.try_recv() {
            match cmd {
                EngineCommand::Stop => break 'session,
                EngineCommand::Enroll { name } => {
                    if controller.begin_enrollment(&name) {
                        enroll_budget = cfg.enroll_attempts;
                        emit(
                            &events,
                            EngineEvent::Status(format!(
                                "enrolling {name}: face the camera alone"
                            )),
                        );
                    } else {
                        emit(
                            &events,
                            EngineEvent::Error(
                                "enrollment is only available while tracking".to_string(),
                            ),
                        );
                    }
                }
                EngineCommand::CancelEnroll => {
                    if let Some(name) = controller.enrolling_name().map(str::to_string) {
                        controller.cancel_enrollment();
                        emit(
                            &events,
                            EngineEvent::EnrollAborted {
                                name,
                                reason: "cancelled".to_string(),
                            },
                        );
                    }
                }
            }
        }

        let frame = match capture.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                // Transient: skip this tick, keep the loop alive.
                tracing::warn!(error = %e, "frame read failed; skipping tick");
                continue;
            }
        };

        match controller.phase().clone() {
            Phase::Tracking => {
                track_tick(&cfg, &mut controller, &mut vision, &frame, &events);
            }
            Phase::Enrolling { name } => {
                enroll_tick(
                    &cfg,
                    &mut controller,
                    &mut vision,
                    &frame,
                    &name,
                    &mut enroll_budget,
                    &events,
                );
            }
            Phase::Stopped => break 'session,
        }
    }

    let summary = controller.stop();
    let log_path = controller.ledger().log_path().to_path_buf();
    tracing::info!(present = summary.present_count, "session ended");
    emit(&events, EngineEvent::Ended { summary, log_path });
}

fn track_tick(
    cfg: &Config,
    controller: &mut SessionController,
    vision: &mut OnnxVision,
    frame: &Frame,
    events: &mpsc::Sender<EngineEvent>,
) {
    let small = frame.downscale(cfg.downscale);
    let view = gray_view(&small);

    let faces = match vision.detect(view) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "detection failed; skipping tick");
            return;
        }
    };

    let mut detections = Vec::with_capacity(faces.len());
    for face in faces {
        match vision.embed(view, &face) {
            Ok(embedding) => detections.push(Detection {
                bbox: face,
                embedding,
            }),
            Err(e) => tracing::warn!(error = %e, "embedding failed for a detection"),
        }
    }

    match controller.tick(&detections, Local::now().naive_local()) {
        Ok(effects) => {
            for effect in effects {
                let event = match effect {
                    Effect::Recorded { name } => EngineEvent::Recorded { name },
                    Effect::Status(text) => EngineEvent::Status(text),
                    Effect::StatusCleared => EngineEvent::StatusCleared,
                };
                emit(events, event);
            }
        }
        Err(e) => emit(events, EngineEvent::Error(e.to_string())),
    }
}

fn enroll_tick(
    cfg: &Config,
    controller: &mut SessionController,
    vision: &mut OnnxVision,
    frame: &Frame,
    name: &str,
    budget: &mut usize,
    events: &mpsc::Sender<EngineEvent>,
) {
    // Enrollment captures from the full-resolution frame: the minimum face
    // size is specified in native pixels.
    let faces = match vision.detect(gray_view(frame)) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "detection failed during enrollment");
            return;
        }
    };

    match enrollment_candidate(&faces) {
        Ok(face) => {
            let saved = save_enrollment_image(&cfg.faces_dir, name, frame, face)
                .and_then(|path| {
                    let refreshed = Catalog::load(&cfg.faces_dir, vision)
                        .context("failed to reload catalog")?;
                    Ok((path, refreshed))
                });
            match saved {
                Ok((path, refreshed)) => {
                    controller.complete_enrollment(refreshed);
                    emit(
                        events,
                        EngineEvent::Enrolled {
                            name: name.to_string(),
                            image: path,
                        },
                    );
                }
                Err(e) => {
                    controller.cancel_enrollment();
                    emit(
                        events,
                        EngineEvent::EnrollAborted {
                            name: name.to_string(),
                            reason: e.to_string(),
                        },
                    );
                }
            }
        }
        Err(reason) => {
            *budget = budget.saturating_sub(1);
            if *budget == 0 {
                controller.cancel_enrollment();
                emit(
                    events,
                    EngineEvent::EnrollAborted {
                        name: name.to_string(),
                        reason: reason.to_string(),
                    },
                );
            } else if *budget % 10 == 0 {
                // Nag sparsely, not every frame.
                emit(
                    events,
                    EngineEvent::Status(format!("enrolling {name}: {reason}")),
                );
            }
        }
    }
}

/// Crop the detected face out of the frame and save it as the identity's
/// reference image.
pub fn save_enrollment_image(
    faces_dir: &Path,
    name: &str,
    frame: &Frame,
    face: &BoundingBox,
) -> Result<PathBuf> {
    let x = face.x.max(0.0) as u32;
    let y = face.y.max(0.0) as u32;
    let crop = frame.crop(x, y, face.width.max(0.0) as u32, face.height.max(0.0) as u32);

    std::fs::create_dir_all(faces_dir)
        .with_context(|| format!("cannot create faces directory {}", faces_dir.display()))?;
    let path = catalog::image_path_for(faces_dir, name);
    image::save_buffer(
        &path,
        &crop.data,
        crop.width,
        crop.height,
        image::ExtendedColorType::L8,
    )
    .with_context(|| format!("failed to save enrollment image {}", path.display()))?;

    tracing::info!(name, path = %path.display(), "enrollment image saved");
    Ok(path)
}

pub fn gray_view(frame: &Frame) -> GrayView<'_> {
    GrayView {
        data: &frame.data,
        width: frame.width,
        height: frame.height,
    }
}

fn emit(events: &mpsc::Sender<EngineEvent>, event: EngineEvent) {
    // The shell hanging up just means nobody is rendering anymore.
    let _ = events.blocking_send(event);
}
