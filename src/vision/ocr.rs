//! OCR (Optical Character Recognition) module
//!
//! Recognition backends sit behind [`PlateRecognizer`]; the pipeline only
//! needs text (possibly empty) and a confidence per candidate region.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use super::regions::CandidateRegion;

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("OCR engine error: {0}")]
    Engine(String),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("OCR process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Text recognized in one region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    /// Recognized text, empty when nothing was read
    pub text: String,
    /// Confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Recognition {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the text has any non-whitespace content
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// OCR backend
pub trait PlateRecognizer: Send {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Read the text in one candidate region
    fn recognize(&mut self, region: &CandidateRegion) -> Result<Recognition, RecognitionError>;

    /// Check the backend is usable before the first frame arrives
    fn warm_up(&mut self) -> Result<(), RecognitionError> {
        Ok(())
    }
}

/// Recognizer that replays queued results, then reads nothing
#[derive(Debug, Default)]
pub struct ScriptedRecognizer {
    script: VecDeque<Result<Recognition, String>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue texts returned one per call with full confidence
    pub fn with_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut recognizer = Self::new();
        for text in texts {
            recognizer.push(Recognition::new(text, 1.0));
        }
        recognizer
    }

    pub fn push(&mut self, recognition: Recognition) {
        self.script.push_back(Ok(recognition));
    }

    /// Queue an engine failure
    pub fn push_failure(&mut self, message: impl Into<String>) {
        self.script.push_back(Err(message.into()));
    }

    /// Shared count of `recognize` calls, readable after the recognizer moves
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl PlateRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn recognize(&mut self, _region: &CandidateRegion) -> Result<Recognition, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(Ok(recognition)) => Ok(recognition),
            Some(Err(message)) => Err(RecognitionError::Engine(message)),
            None => Ok(Recognition::empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::regions::RegionBounds;
    use image::RgbImage;

    fn region() -> CandidateRegion {
        CandidateRegion {
            bounds: RegionBounds {
                x: 0,
                y: 0,
                width: 4,
                height: 2,
            },
            image: RgbImage::new(2, 1),
        }
    }

    #[test]
    fn test_scripted_replays_in_order_then_empty() {
        let mut recognizer = ScriptedRecognizer::with_texts(["А123", "АВ77"]);
        recognizer.push_failure("engine crashed");
        let calls = recognizer.call_counter();

        assert_eq!(recognizer.recognize(&region()).unwrap().text, "А123");
        assert_eq!(recognizer.recognize(&region()).unwrap().text, "АВ77");
        assert!(matches!(
            recognizer.recognize(&region()),
            Err(RecognitionError::Engine(_))
        ));
        assert!(!recognizer.recognize(&region()).unwrap().has_text());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(recognizer.remaining(), 0);
    }

    #[test]
    fn test_has_text_ignores_whitespace() {
        assert!(!Recognition::new("  \n", 0.9).has_text());
        assert!(Recognition::new(" 7 ", 0.9).has_text());
    }
}
