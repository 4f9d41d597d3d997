//! Frame Capture Layer
//!
//! A background worker pulls frames from a source, hands the latest one to
//! the display slot at a bounded rate, and runs plate detection on demand.
//!
//! Detection is armed by the caller and disarmed by the worker once a frame
//! yields text. It runs synchronously inside the worker step, so at most one
//! attempt is ever in flight and frames are never queued behind OCR.
//!
//! Events are held in a bounded queue. When nobody drains it the oldest
//! events are dropped, so a caller that only watches the display slot and
//! the counters never grows memory.

pub mod display;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod frame;
pub mod source;

pub use display::{DisplayFrame, DisplaySlot, DisplayStats};
pub use frame::Frame;
pub use source::{CaptureError, DefaultOpener, FrameSource, SourceOpener};

use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::vision::{PlateCandidate, PlateDetectionPipeline, RecognitionError};

/// Scheduler timing configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum time between displayed frames
    pub display_interval: Duration,
    /// Pause after a failed frame read
    pub read_retry_backoff: Duration,
    /// Undrained events kept before the oldest are dropped
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            display_interval: Duration::from_millis(40),
            read_retry_backoff: Duration::from_secs(1),
            event_capacity: 256,
        }
    }
}

/// Where the current arming cycle stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetectionState {
    /// Not armed
    Idle = 0,
    /// Armed, waiting for the next frame
    Armed = 1,
    /// OCR running on a frame
    Detecting = 2,
    /// Last cycle produced text; idle until armed again
    Recognized = 3,
    /// Last frame produced nothing; still armed
    NotFound = 4,
}

impl DetectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Armed,
            2 => Self::Detecting,
            3 => Self::Recognized,
            4 => Self::NotFound,
            _ => Self::Idle,
        }
    }
}

/// Notifications from the capture worker
#[derive(Debug)]
pub enum SchedulerEvent {
    /// Source opened, frames are flowing
    Started { source: String },
    /// Source could not be opened; the worker halts
    SourceUnavailable(CaptureError),
    /// A frame read failed; the worker retries after the backoff
    FrameReadFailed { consecutive: u64, error: CaptureError },
    /// A frame was read after one or more failures
    Recovered { after_failures: u64 },
    /// Detection produced text; detection is now disarmed
    Recognized(PlateCandidate),
    /// OCR failed on a frame; detection stays armed
    RecognitionFailed(RecognitionError),
    /// The worker exited and released the source
    Stopped,
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_read: u64,
    pub frames_displayed: u64,
    pub read_failures: u64,
    pub detection_attempts: u64,
    pub recognition_failures: u64,
    pub recognitions: u64,
    pub events_dropped: u64,
}

#[derive(Default)]
struct Counters {
    frames_read: AtomicU64,
    frames_displayed: AtomicU64,
    read_failures: AtomicU64,
    detection_attempts: AtomicU64,
    recognition_failures: AtomicU64,
    recognitions: AtomicU64,
    events_dropped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_displayed: self.frames_displayed.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            detection_attempts: self.detection_attempts.load(Ordering::Relaxed),
            recognition_failures: self.recognition_failures.load(Ordering::Relaxed),
            recognitions: self.recognitions.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the scheduler handle and its worker
#[derive(Default)]
struct Shared {
    /// Set by the caller, cleared by the worker on a recognition
    armed: AtomicBool,
    state: AtomicU8,
    running: AtomicBool,
    counters: Counters,
    display: DisplaySlot,
}

impl Shared {
    fn set_state(&self, state: DetectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Handle to a running capture worker
pub struct CaptureScheduler {
    shared: Arc<Shared>,
    events: Receiver<SchedulerEvent>,
    /// Dropping the sender tells the worker to stop
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureScheduler {
    /// Spawn the worker. The source is opened on the worker thread; an open
    /// failure arrives as [`SchedulerEvent::SourceUnavailable`].
    pub fn start(
        uri: impl Into<String>,
        opener: Arc<dyn SourceOpener>,
        pipeline: PlateDetectionPipeline,
        config: SchedulerConfig,
    ) -> std::io::Result<Self> {
        let uri = uri.into();
        let shared = Arc::new(Shared::default());
        let (event_tx, events) = bounded(config.event_capacity.max(1));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(0);

        shared.running.store(true, Ordering::SeqCst);
        let worker = Worker {
            uri,
            opener,
            pipeline,
            config,
            shared: shared.clone(),
            events: EventQueue {
                tx: event_tx,
                overflow: events.clone(),
            },
            stop: stop_rx,
        };
        let handle = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            events,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Request detection on upcoming frames until one yields text
    pub fn arm(&self) {
        self.shared.set_state(DetectionState::Armed);
        self.shared.armed.store(true, Ordering::SeqCst);
        debug!("Detection armed");
    }

    /// Cancel a pending detection request
    pub fn disarm(&self) {
        if self.shared.armed.swap(false, Ordering::SeqCst) {
            self.shared.set_state(DetectionState::Idle);
            debug!("Detection disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.shared.armed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> DetectionState {
        DetectionState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Worker notifications
    pub fn events(&self) -> &Receiver<SchedulerEvent> {
        &self.events
    }

    /// Latest-frame slot for a renderer
    pub fn display(&self) -> &DisplaySlot {
        &self.shared.display
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.counters.snapshot()
    }

    /// Whether the worker loop is still alive
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait until it has released the source
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            // A panic was already logged by the worker's exit guard
            let _ = handle.join();
            info!("Capture stopped");
        }
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sending side of the event queue. Holds a receiver too, so a full queue
/// makes room by discarding its oldest event.
#[derive(Clone)]
struct EventQueue {
    tx: Sender<SchedulerEvent>,
    overflow: Receiver<SchedulerEvent>,
}

impl EventQueue {
    fn push(&self, mut event: SchedulerEvent, counters: &Counters) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if self.overflow.try_recv().is_ok() {
                        Counters::bump(&counters.events_dropped);
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Marks the worker finished and reports `Stopped` on every exit path,
/// including a panic inside detection
struct ExitGuard {
    shared: Arc<Shared>,
    events: EventQueue,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if std::thread::panicking() {
            error!("Capture worker panicked");
        }
        self.events.push(SchedulerEvent::Stopped, &self.shared.counters);
    }
}

struct Worker {
    uri: String,
    opener: Arc<dyn SourceOpener>,
    pipeline: PlateDetectionPipeline,
    config: SchedulerConfig,
    shared: Arc<Shared>,
    events: EventQueue,
    stop: Receiver<()>,
}

impl Worker {
    fn run(mut self) {
        let _exit = ExitGuard {
            shared: self.shared.clone(),
            events: self.events.clone(),
        };

        match self.opener.open(&self.uri) {
            Ok(source) => self.capture_loop(source),
            Err(e) => {
                error!("Failed to open source {}: {}", self.uri, e);
                self.emit(SchedulerEvent::SourceUnavailable(e));
            }
        }
    }

    fn capture_loop(&mut self, mut source: Box<dyn FrameSource>) {
        let description = source.describe();
        info!("Capture started from {}", description);
        self.emit(SchedulerEvent::Started {
            source: description,
        });

        if let Err(e) = self.pipeline.warm_up() {
            warn!("OCR backend {} not ready: {}", self.pipeline.recognizer_name(), e);
        }

        let mut consecutive_failures = 0u64;
        while !self.stop_requested() {
            let step_started = Instant::now();

            match source.read_frame() {
                Ok(frame) => {
                    if consecutive_failures > 0 {
                        info!("Frame reads recovered after {} failure(s)", consecutive_failures);
                        self.emit(SchedulerEvent::Recovered {
                            after_failures: consecutive_failures,
                        });
                        consecutive_failures = 0;
                    }
                    Counters::bump(&self.shared.counters.frames_read);

                    self.shared.display.publish(frame.clone());
                    Counters::bump(&self.shared.counters.frames_displayed);

                    if self.shared.armed.load(Ordering::SeqCst) {
                        self.attempt_detection(&frame);
                    }
                }
                Err(error) => {
                    consecutive_failures += 1;
                    Counters::bump(&self.shared.counters.read_failures);
                    warn!(
                        "Frame read failed ({} in a row), retrying in {:?}: {}",
                        consecutive_failures, self.config.read_retry_backoff, error
                    );
                    self.emit(SchedulerEvent::FrameReadFailed {
                        consecutive: consecutive_failures,
                        error,
                    });
                    if self.pause(self.config.read_retry_backoff) {
                        break;
                    }
                    continue;
                }
            }

            let interval = self.config.display_interval;
            if let Some(remaining) = interval.checked_sub(step_started.elapsed()) {
                if self.pause(remaining) {
                    break;
                }
            }
        }

        drop(source);
        debug!("Capture source released");
    }

    fn attempt_detection(&mut self, frame: &Frame) {
        self.shared.set_state(DetectionState::Detecting);
        Counters::bump(&self.shared.counters.detection_attempts);

        match self.pipeline.detect(frame) {
            Ok(Some(candidate)) => {
                // A disarm that raced with this attempt wins
                let disarmed = self
                    .shared
                    .armed
                    .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if disarmed {
                    Counters::bump(&self.shared.counters.recognitions);
                    self.shared.set_state(DetectionState::Recognized);
                    info!("Plate text recognized: '{}'", candidate.text);
                    self.emit(SchedulerEvent::Recognized(candidate));
                } else {
                    self.shared.set_state(DetectionState::Idle);
                }
            }
            Ok(None) => {
                self.shared.set_state(self.settled_state(DetectionState::NotFound));
            }
            Err(e) => {
                Counters::bump(&self.shared.counters.recognition_failures);
                warn!("Recognition failed: {}", e);
                self.shared.set_state(self.settled_state(DetectionState::NotFound));
                self.emit(SchedulerEvent::RecognitionFailed(e));
            }
        }
    }

    /// `state` if still armed, otherwise idle
    fn settled_state(&self, state: DetectionState) -> DetectionState {
        if self.shared.armed.load(Ordering::SeqCst) {
            state
        } else {
            DetectionState::Idle
        }
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `duration`, returning early with `true` if stop was requested
    fn pause(&self, duration: Duration) -> bool {
        !matches!(self.stop.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }

    fn emit(&self, event: SchedulerEvent) {
        self.events.push(event, &self.shared.counters);
    }
}
