//! Attendance session state machine.
//!
//! Pure with respect to I/O beyond the ledger append: the driving loop owns
//! the camera and the vision backend, hands each tick's detections (and the
//! current time) to the controller, and renders the returned effects however
//! it likes. Camera acquisition happens before the controller exists, so the
//! phases here start at recognition.

use crate::catalog::Catalog;
use crate::ledger::{LedgerError, SessionLedger, SessionSummary};
use crate::matcher::{Matcher, NearestMatcher};
use crate::types::{BoundingBox, Detection};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::Path;
use thiserror::Error;

/// Minimum size, in pixels, of the smaller bounding-box dimension for an
/// enrollment capture.
pub const MIN_FACE_SIZE: f32 = 100.0;

/// How long a status line stays up before it auto-clears.
const STATUS_LINGER_SECS: i64 = 5;

/// Recognition phase of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Matching detections against the catalog and recording attendance.
    Tracking,
    /// Recognition paused while capturing a reference image for `name`.
    Enrolling { name: String },
    Stopped,
}

/// What a tick asked the outside world to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A new attendance record was appended to the log.
    Recorded { name: String },
    /// Show this transient status line.
    Status(String),
    /// The status line expired; clear it.
    StatusCleared,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no enrolled identities; register at least one face first")]
    NoEnrolledIdentities,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Enrollment capture rejections. All retryable: the caller keeps feeding
/// frames until one qualifies or it gives up.
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("no face detected")]
    NoFace,
    #[error("{count} faces in frame; exactly one person must be visible")]
    MultipleFaces { count: usize },
    #[error("face too small ({size:.0}px); move closer to the camera")]
    FaceTooSmall { size: f32 },
}

/// Drives one attendance session over a catalog snapshot.
pub struct SessionController {
    catalog: Catalog,
    ledger: SessionLedger,
    threshold: f32,
    phase: Phase,
    status_expiry: Option<NaiveDateTime>,
}

impl SessionController {
    /// Start a session for `date`. Fails up front when the catalog is empty,
    /// before any camera work is worth doing.
    pub fn start(
        catalog: Catalog,
        logs_dir: &Path,
        date: NaiveDate,
        threshold: f32,
    ) -> Result<Self, SessionError> {
        if catalog.is_empty() {
            return Err(SessionError::NoEnrolledIdentities);
        }

        let ledger = SessionLedger::start(catalog.names(), logs_dir, date)?;
        tracing::info!(
            roster = catalog.len(),
            log = %ledger.log_path().display(),
            "attendance session started"
        );

        Ok(Self {
            catalog,
            ledger,
            threshold,
            phase: Phase::Tracking,
            status_expiry: None,
        })
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Process one frame's detections.
    ///
    /// A ledger write failure is returned to the caller for surfacing, but
    /// the roster has already moved: the next tick will not retry the row.
    pub fn tick(
        &mut self,
        detections: &[Detection],
        now: NaiveDateTime,
    ) -> Result<Vec<Effect>, SessionError> {
        let mut effects = Vec::new();

        if let Some(expiry) = self.status_expiry {
            if now >= expiry {
                self.status_expiry = None;
                effects.push(Effect::StatusCleared);
            }
        }

        if self.phase != Phase::Tracking {
            return Ok(effects);
        }

        for detection in detections {
            let Some(candidate) =
                NearestMatcher.best_match(&detection.embedding, self.catalog.identities(), self.threshold)
            else {
                continue;
            };

            if self.ledger.record_if_new(&candidate.name, now)? {
                tracing::debug!(
                    name = %candidate.name,
                    distance = candidate.distance,
                    "new attendance match"
                );
                effects.push(Effect::Status(format!(
                    "{} is present at {}",
                    candidate.name,
                    now.format("%H:%M:%S")
                )));
                effects.push(Effect::Recorded {
                    name: candidate.name,
                });
                self.status_expiry = Some(now + Duration::seconds(STATUS_LINGER_SECS));
            }
        }

        Ok(effects)
    }

    /// Pause recognition to capture a reference image. Only valid while
    /// tracking; returns `false` otherwise.
    pub fn begin_enrollment(&mut self, name: &str) -> bool {
        if self.phase != Phase::Tracking {
            return false;
        }
        self.phase = Phase::Enrolling {
            name: name.to_string(),
        };
        true
    }

    /// Abandon an in-progress enrollment and resume tracking.
    pub fn cancel_enrollment(&mut self) -> bool {
        if !matches!(self.phase, Phase::Enrolling { .. }) {
            return false;
        }
        self.phase = Phase::Tracking;
        true
    }

    pub fn enrolling_name(&self) -> Option<&str> {
        match &self.phase {
            Phase::Enrolling { name } => Some(name),
            _ => None,
        }
    }

    /// Swap in the reloaded catalog after an enrollment image was saved, and
    /// extend the roster with any names not yet known. Resumes tracking.
    /// Returns the newly expected names.
    pub fn complete_enrollment(&mut self, refreshed: Catalog) -> Vec<String> {
        let mut added = Vec::new();
        for name in refreshed.names() {
            if self.ledger.enroll(&name) {
                added.push(name);
            }
        }
        self.catalog = refreshed;
        self.phase = Phase::Tracking;
        tracing::info!(?added, "enrollment complete, roster extended");
        added
    }

    pub fn stop(&mut self) -> SessionSummary {
        self.phase = Phase::Stopped;
        self.ledger.summary()
    }
}

/// Validate a frame's detections for an enrollment capture: exactly one face,
/// large enough to make a usable reference image.
pub fn enrollment_candidate(faces: &[BoundingBox]) -> Result<&BoundingBox, EnrollmentError> {
    match faces {
        [] => Err(EnrollmentError::NoFace),
        [face] => {
            let size = face.min_dimension();
            if size < MIN_FACE_SIZE {
                Err(EnrollmentError::FaceTooSmall { size })
            } else {
                Ok(face)
            }
        }
        _ => Err(EnrollmentError::MultipleFaces { count: faces.len() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, Identity};
    use std::path::Path;

    fn emb(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model_version: None,
        }
    }

    fn identity(name: &str, values: &[f32]) -> Identity {
        Identity {
            name: name.to_string(),
            embedding: emb(values),
        }
    }

    fn detection(values: &[f32]) -> Detection {
        Detection {
            bbox: bbox(200.0, 200.0),
            embedding: emb(values),
        }
    }

    fn bbox(w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    fn at(secs: u32) -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(9, 0, secs)
            .unwrap()
    }

    fn controller(dir: &Path, identities: Vec<Identity>) -> SessionController {
        SessionController::start(
            Catalog::from_identities(identities),
            dir,
            at(0).date(),
            0.6,
        )
        .unwrap()
    }

    #[test]
    fn test_empty_catalog_refuses_to_start() {
        let tmp = tempfile::tempdir().unwrap();
        let result = SessionController::start(
            Catalog::default(),
            tmp.path(),
            at(0).date(),
            0.6,
        );
        assert!(matches!(result, Err(SessionError::NoEnrolledIdentities)));
    }

    #[test]
    fn test_clean_match_records_once() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);

        let effects = ctl.tick(&[detection(&[0.1, 0.0])], at(0)).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Recorded { name } if name == "Alice")));
        assert!(ctl.ledger().remaining().is_empty());
        assert!(ctl.ledger().attended().contains("Alice"));

        let contents = std::fs::read_to_string(ctl.ledger().log_path()).unwrap();
        assert_eq!(
            contents,
            "Name,Timestamp,Status\nAlice,2024-03-11 09:00:00,Present\n"
        );
    }

    #[test]
    fn test_unknown_face_no_mutation() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);

        let effects = ctl.tick(&[detection(&[5.0, 5.0])], at(0)).unwrap();
        assert!(effects.is_empty());
        assert!(ctl.ledger().attended().is_empty());
        assert!(!ctl.ledger().log_path().exists());
    }

    #[test]
    fn test_repeat_detection_is_silent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);

        ctl.tick(&[detection(&[0.1, 0.0])], at(0)).unwrap();
        for s in 1..4 {
            let effects = ctl.tick(&[detection(&[0.1, 0.0])], at(s)).unwrap();
            assert!(!effects
                .iter()
                .any(|e| matches!(e, Effect::Recorded { .. })));
        }

        let contents = std::fs::read_to_string(ctl.ledger().log_path()).unwrap();
        assert_eq!(contents.matches("Alice").count(), 1);
    }

    #[test]
    fn test_status_clears_after_linger() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);

        ctl.tick(&[detection(&[0.1, 0.0])], at(0)).unwrap();

        let effects = ctl.tick(&[], at(4)).unwrap();
        assert!(effects.is_empty());

        let effects = ctl.tick(&[], at(5)).unwrap();
        assert_eq!(effects, vec![Effect::StatusCleared]);

        // Cleared once, not again.
        let effects = ctl.tick(&[], at(6)).unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn test_mid_session_enrollment_extends_roster() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);

        assert!(ctl.begin_enrollment("Bob"));
        assert_eq!(ctl.enrolling_name(), Some("Bob"));

        // Recognition is paused while enrolling.
        let effects = ctl.tick(&[detection(&[0.1, 0.0])], at(1)).unwrap();
        assert!(effects.is_empty());
        assert!(ctl.ledger().attended().is_empty());

        let refreshed = Catalog::from_identities(vec![
            identity("Alice", &[0.0, 0.0]),
            identity("Bob", &[3.0, 3.0]),
        ]);
        let added = ctl.complete_enrollment(refreshed);
        assert_eq!(added, vec!["Bob"]);
        assert_eq!(ctl.phase(), &Phase::Tracking);
        assert!(ctl.ledger().remaining().contains("Alice"));
        assert!(ctl.ledger().remaining().contains("Bob"));

        // Bob now matches; Alice stays expected.
        ctl.tick(&[detection(&[3.1, 3.0])], at(2)).unwrap();
        assert!(ctl.ledger().attended().contains("Bob"));
        assert!(ctl.ledger().remaining().contains("Alice"));
    }

    #[test]
    fn test_cancel_enrollment_resumes_tracking() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);

        assert!(ctl.begin_enrollment("Bob"));
        assert!(ctl.cancel_enrollment());
        assert_eq!(ctl.phase(), &Phase::Tracking);
        assert!(!ctl.cancel_enrollment());
    }

    #[test]
    fn test_begin_enrollment_only_while_tracking() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(tmp.path(), vec![identity("Alice", &[0.0, 0.0])]);
        ctl.stop();
        assert!(!ctl.begin_enrollment("Bob"));
    }

    #[test]
    fn test_stop_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctl = controller(
            tmp.path(),
            vec![
                identity("Alice", &[0.0, 0.0]),
                identity("Bob", &[3.0, 3.0]),
            ],
        );
        ctl.tick(&[detection(&[0.05, 0.0])], at(0)).unwrap();

        let summary = ctl.stop();
        assert_eq!(summary.present_count, 1);
        assert_eq!(summary.absent_names, vec!["Bob"]);
        assert_eq!(ctl.phase(), &Phase::Stopped);
    }

    #[test]
    fn test_enrollment_candidate_rules() {
        assert!(matches!(
            enrollment_candidate(&[]),
            Err(EnrollmentError::NoFace)
        ));
        assert!(matches!(
            enrollment_candidate(&[bbox(200.0, 200.0), bbox(150.0, 150.0)]),
            Err(EnrollmentError::MultipleFaces { count: 2 })
        ));
        assert!(matches!(
            enrollment_candidate(&[bbox(200.0, 80.0)]),
            Err(EnrollmentError::FaceTooSmall { .. })
        ));
        assert!(enrollment_candidate(&[bbox(100.0, 120.0)]).is_ok());
    }
}
