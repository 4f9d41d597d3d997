//! Tesseract OCR backend
//!
//! Runs the `tesseract` command line tool on each region. The preprocessed
//! region is piped in as PNG and word-level TSV is read back.

use image::ImageFormat;
use std::io::{Cursor, ErrorKind, Write};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use super::ocr::{PlateRecognizer, Recognition, RecognitionError};
use super::ocr_preprocess::{prepare_region, OcrPreprocessing};
use super::regions::CandidateRegion;

/// TSV level of word rows
const WORD_LEVEL: &str = "5";

/// Tesseract command line engine wrapper
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    command: String,
    language: String,
    page_segmentation: u8,
    preprocessing: OcrPreprocessing,
}

impl TesseractRecognizer {
    /// Create a recognizer using `command` with the given language pack
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            // Single text line
            page_segmentation: 7,
            preprocessing: OcrPreprocessing::default(),
        }
    }

    pub fn with_page_segmentation(mut self, mode: u8) -> Self {
        self.page_segmentation = mode;
        self
    }

    pub fn with_preprocessing(mut self, preprocessing: OcrPreprocessing) -> Self {
        self.preprocessing = preprocessing;
        self
    }

    /// Get the current language
    pub fn language(&self) -> &str {
        &self.language
    }

    fn run(&self, png: &[u8]) -> Result<String, RecognitionError> {
        let psm = self.page_segmentation.to_string();
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.language, "--psm", &psm, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Dropping stdin closes the pipe before waiting
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(png),
            None => Ok(()),
        };
        // Always reap the child, even when it stopped reading early
        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Engine(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }
        match written {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                return Err(RecognitionError::Engine(format!(
                    "{} exited before reading the image",
                    self.command
                )));
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }

        String::from_utf8(output.stdout)
            .map_err(|e| RecognitionError::Engine(format!("non UTF-8 output: {}", e)))
    }
}

impl PlateRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&mut self, region: &CandidateRegion) -> Result<Recognition, RecognitionError> {
        let prepared = prepare_region(&region.image, &self.preprocessing);
        let mut png = Vec::new();
        prepared.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        let tsv = self.run(&png)?;
        let recognition = parse_tsv(&tsv);
        debug!(
            "Tesseract read '{}' ({:.2}) from {}x{} region",
            recognition.text,
            recognition.confidence,
            prepared.width(),
            prepared.height()
        );
        Ok(recognition)
    }

    fn warm_up(&mut self) -> Result<(), RecognitionError> {
        let output = Command::new(&self.command)
            .arg("--list-langs")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()?;

        let listing = String::from_utf8_lossy(&output.stdout);
        if !listing.lines().any(|line| line.trim() == self.language) {
            warn!(
                "Tesseract language '{}' not listed as installed",
                self.language
            );
        }
        info!("Tesseract OCR ready ({}, psm {})", self.language, self.page_segmentation);
        Ok(())
    }
}

/// Join recognized words; confidence is the mean word confidence scaled to 0-1
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut text = String::new();
    let mut confidence_sum = 0.0f32;
    let mut words = 0u32;

    // Header row first, then: level page block par line word left top width height conf text
    for row in tsv.lines().skip(1) {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }
        let Ok(confidence) = columns[10].trim().parse::<f32>() else {
            continue;
        };
        let word = columns[11].trim();
        if confidence < 0.0 || word.is_empty() {
            continue;
        }
        text.push_str(word);
        confidence_sum += confidence;
        words += 1;
    }

    if words == 0 {
        return Recognition::empty();
    }
    Recognition::new(text, (confidence_sum / words as f32 / 100.0).clamp(0.0, 1.0))
}
