//! Application Coordinator
//!
//! Wires capture, detection, the registry and verification together, and
//! turns scheduler events into reportable gate updates.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::analysis::{VerificationEngine, Verdict};
use crate::capture::{CaptureError, CaptureScheduler, Frame, SchedulerEvent, SourceOpener};
use crate::config::AppConfig;
use crate::storage::registry::{PlateFormat, RegistryError, SqliteRegistry};
use crate::vision::{PlateDetectionPipeline, PlateRecognizer, RegionProposer, TesseractRecognizer};

/// Something the gate operator should hear about
#[derive(Debug)]
pub enum GateUpdate {
    /// A plate was read and checked against the registry
    Verdict(Verdict),
    /// A plate was read but the registry could not be consulted
    CheckFailed { raw: String, error: RegistryError },
    /// Frame reads are failing; capture keeps retrying
    ReadFailed { consecutive: u64, error: CaptureError },
    /// The source could not be opened; capture has halted
    Halted(CaptureError),
    /// Capture has stopped
    Stopped,
}

/// Receives gate updates for presentation
pub trait VerdictSink {
    fn report(&mut self, update: &GateUpdate);
}

/// JSON form of a [`GateUpdate`]
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum UpdateRecord<'a> {
    Verdict(&'a Verdict),
    CheckFailed { raw: &'a str, error: String },
    ReadFailed { consecutive: u64, error: String },
    Halted { error: String },
    Stopped,
}

impl<'a> From<&'a GateUpdate> for UpdateRecord<'a> {
    fn from(update: &'a GateUpdate) -> Self {
        match update {
            GateUpdate::Verdict(verdict) => UpdateRecord::Verdict(verdict),
            GateUpdate::CheckFailed { raw, error } => UpdateRecord::CheckFailed {
                raw,
                error: error.to_string(),
            },
            GateUpdate::ReadFailed { consecutive, error } => UpdateRecord::ReadFailed {
                consecutive: *consecutive,
                error: error.to_string(),
            },
            GateUpdate::Halted(error) => UpdateRecord::Halted {
                error: error.to_string(),
            },
            GateUpdate::Stopped => UpdateRecord::Stopped,
        }
    }
}

/// Prints updates to stdout as text or one JSON object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink {
    pub json: bool,
}

impl ConsoleSink {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Render an update as a single output line
    pub fn render(&self, update: &GateUpdate) -> String {
        if self.json {
            return serde_json::to_string(&UpdateRecord::from(update))
                .unwrap_or_else(|e| format!("{{\"event\":\"error\",\"error\":\"{}\"}}", e));
        }

        match update {
            GateUpdate::Verdict(verdict) => format_verdict(verdict),
            GateUpdate::CheckFailed { raw, error } => {
                format!("Read '{}' but could not check the registry: {}", raw, error)
            }
            GateUpdate::ReadFailed { consecutive, error } => {
                format!("Frame read failed ({} in a row): {}", consecutive, error)
            }
            GateUpdate::Halted(error) => format!("Capture halted: {}", error),
            GateUpdate::Stopped => "Capture stopped".to_string(),
        }
    }
}

impl VerdictSink for ConsoleSink {
    fn report(&mut self, update: &GateUpdate) {
        println!("{}", self.render(update));
    }
}

/// Human-readable verdict summary
pub fn format_verdict(verdict: &Verdict) -> String {
    let Some(input) = &verdict.input else {
        return "No plate found".to_string();
    };

    let mut out = format!(
        "Plate '{}' (read as '{}'): access {}",
        verdict.normalized,
        input.trim(),
        if verdict.access_granted { "GRANTED" } else { "DENIED" }
    );
    for m in &verdict.matches {
        out.push_str(&format!("\n  {} {:>6.2}%  {}", m.plate, m.similarity, m.owner));
    }
    out
}

/// Registry database path: explicit override, then config, then data dir
pub fn resolve_database_path(config: &AppConfig, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = &config.registry.database {
        return Ok(path.clone());
    }
    crate::storage::default_database_path()
}

/// Open the registry configured in `config`
pub fn open_registry(config: &AppConfig, explicit: Option<&Path>) -> Result<SqliteRegistry> {
    let path = resolve_database_path(config, explicit)?;
    let format = PlateFormat::new(&config.registry.plate_pattern)?;
    SqliteRegistry::open(&path, format)
        .with_context(|| format!("Failed to open registry at {}", path.display()))
}

/// Tesseract recognizer from the OCR settings
pub fn build_recognizer(config: &AppConfig) -> Box<dyn PlateRecognizer> {
    Box::new(
        TesseractRecognizer::new(&config.ocr.command, &config.ocr.language)
            .with_page_segmentation(config.ocr.page_segmentation)
            .with_preprocessing(config.ocr.preprocessing()),
    )
}

pub fn build_pipeline(
    config: &AppConfig,
    recognizer: Box<dyn PlateRecognizer>,
) -> PlateDetectionPipeline {
    PlateDetectionPipeline::new(
        RegionProposer::new(config.detection.proposer()),
        recognizer,
        config.detection.candidate_policy,
    )
}

pub fn build_engine(config: &AppConfig) -> Result<VerificationEngine> {
    Ok(VerificationEngine::new(config.verification.threshold)?
        .with_zero_letter_o_folding(config.verification.fold_zero_letter_o))
}

/// Run detection on a single image and verify the result
pub fn check_image(
    path: &Path,
    pipeline: &mut PlateDetectionPipeline,
    engine: &VerificationEngine,
    registry: &SqliteRegistry,
) -> Result<Verdict> {
    let image = image::open(path)
        .with_context(|| format!("Failed to load image: {}", path.display()))?;
    let frame = Frame::from_rgb(image.to_rgb8());
    let candidate = pipeline.detect(&frame)?;
    let verdict = engine.verify(candidate.as_ref().map(|c| c.text.as_str()), registry)?;
    Ok(verdict)
}

/// Main application coordinator
pub struct GateApp {
    scheduler: CaptureScheduler,
    registry: SqliteRegistry,
    engine: VerificationEngine,
}

impl GateApp {
    /// Start capturing from `source`
    pub fn start(
        config: &AppConfig,
        source: &str,
        opener: Arc<dyn SourceOpener>,
        recognizer: Box<dyn PlateRecognizer>,
        registry: SqliteRegistry,
    ) -> Result<Self> {
        let engine = build_engine(config)?;
        let pipeline = build_pipeline(config, recognizer);
        let scheduler =
            CaptureScheduler::start(source, opener, pipeline, config.capture.scheduler())
                .context("Failed to spawn capture worker")?;

        info!(
            "Gate started on {} (threshold {:.1}, {:?} policy)",
            source,
            engine.threshold(),
            config.detection.candidate_policy
        );
        Ok(Self {
            scheduler,
            registry,
            engine,
        })
    }

    /// Look for a plate on upcoming frames
    pub fn arm(&self) {
        self.scheduler.arm();
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &SqliteRegistry {
        &self.registry
    }

    /// Wait up to `timeout` for the next scheduler event worth reporting
    pub fn pump(&mut self, timeout: Duration) -> Option<GateUpdate> {
        let event = self.scheduler.events().recv_timeout(timeout).ok()?;
        self.handle_event(event)
    }

    fn handle_event(&self, event: SchedulerEvent) -> Option<GateUpdate> {
        match event {
            SchedulerEvent::Recognized(candidate) => {
                match self.engine.verify(Some(&candidate.text), &self.registry) {
                    Ok(verdict) => Some(GateUpdate::Verdict(verdict)),
                    Err(error) => {
                        error!("Registry check failed for '{}': {}", candidate.text, error);
                        Some(GateUpdate::CheckFailed {
                            raw: candidate.text,
                            error,
                        })
                    }
                }
            }
            SchedulerEvent::FrameReadFailed { consecutive, error } => {
                Some(GateUpdate::ReadFailed { consecutive, error })
            }
            SchedulerEvent::SourceUnavailable(error) => Some(GateUpdate::Halted(error)),
            SchedulerEvent::Stopped => Some(GateUpdate::Stopped),
            SchedulerEvent::Started { source } => {
                debug!("Capture running on {}", source);
                None
            }
            SchedulerEvent::Recovered { after_failures } => {
                debug!("Capture recovered after {} failure(s)", after_failures);
                None
            }
            SchedulerEvent::RecognitionFailed(e) => {
                warn!("Detection attempt failed, still armed: {}", e);
                None
            }
        }
    }

    /// Stop capture and wait for the worker to exit
    pub fn stop(&mut self) {
        self.scheduler.stop();
    }
}
