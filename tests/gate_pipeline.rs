//! End-to-end checks: capture worker, detection pipeline, registry, verdict.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;

use plate_gate::analysis::VerificationEngine;
use plate_gate::app::{GateApp, GateUpdate};
use plate_gate::capture::{
    CaptureScheduler, DefaultOpener, DetectionState, SchedulerConfig, SchedulerEvent,
};
use plate_gate::config::AppConfig;
use plate_gate::storage::registry::{
    PlateFormat, PlateRegistry, RegistryEntry, RegistryError, SqliteRegistry,
};
use plate_gate::vision::{
    CandidatePolicy, PlateDetectionPipeline, ProposerConfig, RegionProposer, ScriptedRecognizer,
};

fn registry() -> SqliteRegistry {
    let registry = SqliteRegistry::open_in_memory(PlateFormat::standard().unwrap()).unwrap();
    registry
        .add("А123АВ77", "Ivan", "Ivanov", Some("Ivanovich"))
        .unwrap();
    registry.add("М555ОР99", "Anna", "Petrova", None).unwrap();
    registry
}

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.capture.display_interval_ms = 5;
    config.capture.read_retry_backoff_ms = 10;
    config
}

fn wait_for<T>(mut poll: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(value) = poll() {
            return value;
        }
    }
    panic!("timed out");
}

#[test]
fn scheduler_recognition_grants_registered_plate() {
    let recognizer = ScriptedRecognizer::with_texts(["", "", "a123ab77"]);
    let calls = recognizer.call_counter();
    let pipeline = PlateDetectionPipeline::new(
        RegionProposer::new(ProposerConfig::default()),
        Box::new(recognizer),
        CandidatePolicy::Concatenate,
    );
    let mut scheduler = CaptureScheduler::start(
        "stub://640x480",
        Arc::new(DefaultOpener),
        pipeline,
        SchedulerConfig {
            display_interval: Duration::from_millis(5),
            read_retry_backoff: Duration::from_millis(10),
            ..SchedulerConfig::default()
        },
    )
    .unwrap();

    scheduler.arm();
    let candidate = wait_for(|| match scheduler.events().recv_timeout(Duration::from_millis(50)) {
        Ok(SchedulerEvent::Recognized(candidate)) => Some(candidate),
        _ => None,
    });

    assert_eq!(candidate.text, "a123ab77");
    assert!(!scheduler.is_armed());
    assert_eq!(scheduler.state(), DetectionState::Recognized);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let verdict = VerificationEngine::default()
        .verify(Some(&candidate.text), &registry())
        .unwrap();
    assert!(verdict.access_granted);
    assert_eq!(verdict.normalized.as_str(), "А123АВ77");
    assert_eq!(verdict.best_match().unwrap().owner, "Ivanov Ivan Ivanovich");

    scheduler.stop();
    assert!(!scheduler.is_running());
}

#[test]
fn unknown_plate_from_image_directory_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let mut image = GrayImage::from_pixel(400, 300, Luma([30]));
    draw_filled_rect_mut(&mut image, Rect::at(140, 200).of_size(120, 30), Luma([230]));
    image.save(dir.path().join("frame_000.png")).unwrap();

    let mut app = GateApp::start(
        &fast_config(),
        dir.path().to_str().unwrap(),
        Arc::new(DefaultOpener),
        Box::new(ScriptedRecognizer::with_texts(["Х999ХХ11"])),
        registry(),
    )
    .unwrap();

    app.arm();
    let verdict = wait_for(|| match app.pump(Duration::from_millis(50)) {
        Some(GateUpdate::Verdict(verdict)) => Some(verdict),
        _ => None,
    });

    assert!(!verdict.access_granted);
    assert!(verdict.matches.is_empty());
    app.stop();
}

struct BrokenRegistry;

impl PlateRegistry for BrokenRegistry {
    fn list_all(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        Err(RegistryError::Unavailable(rusqlite::Error::InvalidQuery))
    }
}

#[test]
fn registry_failure_is_not_a_denial() {
    let engine = VerificationEngine::default();

    let result = engine.verify(Some("А123АВ77"), &BrokenRegistry);
    assert!(matches!(result, Err(RegistryError::Unavailable(_))));

    // Nothing to look up, so the registry is never consulted
    let verdict = engine.verify(None, &BrokenRegistry).unwrap();
    assert!(!verdict.access_granted);
    assert!(verdict.input.is_none());
}
