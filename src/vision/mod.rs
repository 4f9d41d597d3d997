//! Vision/OCR Layer
//!
//! Finds plate-shaped regions in captured frames and reads their text.
//! Supports multiple OCR backends:
//! - Tesseract command line tool
//! - Scripted results for demos and tests

pub mod ocr;
pub mod ocr_preprocess;
pub mod regions;
pub mod tesseract;

pub use ocr::{PlateRecognizer, Recognition, RecognitionError, ScriptedRecognizer};
pub use ocr_preprocess::OcrPreprocessing;
pub use regions::{CandidateRegion, ProposerConfig, RegionBounds, RegionProposer};
pub use tesseract::TesseractRecognizer;

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use crate::capture::frame::Frame;

/// How region texts from one frame combine into the raw candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidatePolicy {
    /// Join every non-empty region text in discovery order
    #[default]
    Concatenate,
    /// Keep only the most confident non-empty region text
    BestConfidence,
}

/// Text read from a single region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: f32,
    pub bounds: RegionBounds,
}

/// Non-empty raw plate text produced from one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateCandidate {
    /// Combined raw text, never empty
    pub text: String,
    /// Region readings that contributed to `text`
    pub recognitions: Vec<RawRecognition>,
}

/// Region proposal followed by OCR on every candidate
pub struct PlateDetectionPipeline {
    proposer: RegionProposer,
    recognizer: Box<dyn PlateRecognizer>,
    policy: CandidatePolicy,
}

impl PlateDetectionPipeline {
    pub fn new(
        proposer: RegionProposer,
        recognizer: Box<dyn PlateRecognizer>,
        policy: CandidatePolicy,
    ) -> Self {
        Self {
            proposer,
            recognizer,
            policy,
        }
    }

    pub fn policy(&self) -> CandidatePolicy {
        self.policy
    }

    pub fn recognizer_name(&self) -> &str {
        self.recognizer.name()
    }

    /// Prepare the OCR backend
    pub fn warm_up(&mut self) -> Result<(), RecognitionError> {
        self.recognizer.warm_up()
    }

    /// Run detection on one frame.
    ///
    /// `Ok(None)` means no region produced text. An OCR error on any region
    /// fails the whole attempt.
    pub fn detect(&mut self, frame: &Frame) -> Result<Option<PlateCandidate>, RecognitionError> {
        let start = Instant::now();
        let regions = self.proposer.propose(frame);

        let mut readings = Vec::new();
        for region in &regions {
            let recognition = self.recognizer.recognize(region)?;
            if recognition.has_text() {
                readings.push(RawRecognition {
                    text: recognition.text.trim().to_string(),
                    confidence: recognition.confidence,
                    bounds: region.bounds,
                });
            }
        }

        let candidate = combine(readings, self.policy);
        debug!(
            "Detection over {} region(s) with {} in {:?}: {:?}",
            regions.len(),
            self.recognizer.name(),
            start.elapsed(),
            candidate.as_ref().map(|c| c.text.as_str())
        );
        Ok(candidate)
    }
}

fn combine(readings: Vec<RawRecognition>, policy: CandidatePolicy) -> Option<PlateCandidate> {
    if readings.is_empty() {
        return None;
    }

    match policy {
        CandidatePolicy::Concatenate => {
            let text = readings.iter().map(|r| r.text.as_str()).collect::<String>();
            Some(PlateCandidate {
                text,
                recognitions: readings,
            })
        }
        CandidatePolicy::BestConfidence => {
            // Strictly greater, so the earliest region wins ties
            let best = readings
                .into_iter()
                .reduce(|best, next| if next.confidence > best.confidence { next } else { best })?;
            Some(PlateCandidate {
                text: best.text.clone(),
                recognitions: vec![best],
            })
        }
    }
}
