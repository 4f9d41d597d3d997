//! PlateGate - vehicle access control by license plate
//!
//! Frames flow from a capture source through region proposal and OCR; the
//! recognized text is normalized, scored against a registry of known plates,
//! and turned into an access verdict.

pub mod analysis;
pub mod app;
pub mod capture;
pub mod config;
pub mod storage;
pub mod vision;

pub use analysis::{VerificationEngine, Verdict};
pub use app::{GateApp, GateUpdate};
pub use capture::{CaptureScheduler, Frame};
pub use config::AppConfig;
pub use vision::PlateDetectionPipeline;
