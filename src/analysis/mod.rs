//! Plate text analysis
//!
//! Turns recognized text into an access decision: normalization to the plate
//! alphabet, similarity scoring, and verification against the registry.

pub mod normalize;
pub mod similarity;
pub mod verify;

pub use normalize::{normalize_plate, NormalizedPlate};
pub use similarity::similarity;
pub use verify::{InvalidThreshold, MatchResult, VerificationEngine, Verdict};
