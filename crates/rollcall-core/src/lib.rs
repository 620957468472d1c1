//! rollcall-core — Attendance tracking over face recognition.
//!
//! Owns the catalog of enrolled identities, the matching policy, the
//! once-per-day attendance ledger and the session state machine. Face
//! detection and embedding extraction are consumed through the
//! [`FaceVision`] seam; camera and rendering live in other crates.

pub mod catalog;
pub mod ledger;
pub mod matcher;
pub mod session;
pub mod types;
pub mod vision;

pub use catalog::{Catalog, CatalogError};
pub use ledger::{LedgerError, SessionLedger, SessionSummary};
pub use matcher::{MatchCandidate, Matcher, NearestMatcher};
pub use session::{Effect, EnrollmentError, Phase, SessionController, SessionError};
pub use types::{BoundingBox, Detection, Embedding, Identity};
pub use vision::{FaceVision, GrayView, VisionError};
