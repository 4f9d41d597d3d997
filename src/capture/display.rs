//! Latest-frame handoff between the capture worker and a renderer
//!
//! The slot holds at most one frame. Publishing over an undelivered frame
//! drops the older one, so a slow consumer never stalls acquisition.

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

use super::frame::Frame;

#[derive(Default)]
struct SlotState {
    frame: Option<Frame>,
    sequence: u64,
    published: u64,
    dropped: u64,
}

/// Single-slot frame mailbox
#[derive(Default)]
pub struct DisplaySlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// A frame taken from the slot together with its publish sequence number
#[derive(Debug, Clone)]
pub struct DisplayFrame {
    /// 1-based sequence number of the publish that produced this frame
    pub sequence: u64,
    pub frame: Frame,
}

/// Publish/drop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    pub published: u64,
    pub dropped: u64,
}

impl DisplaySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot content with `frame`
    pub fn publish(&self, frame: Frame) {
        let mut state = self.state.lock();
        if state.frame.replace(frame).is_some() {
            state.dropped += 1;
        }
        state.sequence += 1;
        state.published += 1;
        drop(state);
        self.ready.notify_one();
    }

    /// Take the latest frame if one is waiting
    pub fn take(&self) -> Option<DisplayFrame> {
        let mut state = self.state.lock();
        let sequence = state.sequence;
        state.frame.take().map(|frame| DisplayFrame { sequence, frame })
    }

    /// Wait up to `timeout` for a frame, then take it
    pub fn wait_take(&self, timeout: Duration) -> Option<DisplayFrame> {
        let mut state = self.state.lock();
        if state.frame.is_none() {
            self.ready.wait_for(&mut state, timeout);
        }
        let sequence = state.sequence;
        state.frame.take().map(|frame| DisplayFrame { sequence, frame })
    }

    /// Whether a frame is waiting
    pub fn is_pending(&self) -> bool {
        self.state.lock().frame.is_some()
    }

    pub fn stats(&self) -> DisplayStats {
        let state = self.state.lock();
        DisplayStats {
            published: state.published,
            dropped: state.dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::sync::Arc;

    fn frame(value: u8) -> Frame {
        Frame::from_gray(GrayImage::from_pixel(2, 2, Luma([value])))
    }

    #[test]
    fn test_burst_keeps_only_latest() {
        let slot = DisplaySlot::new();
        for value in 1..=10 {
            slot.publish(frame(value));
        }

        let taken = slot.take().unwrap();
        assert_eq!(taken.sequence, 10);
        assert_eq!(taken.frame.data[0], 10);
        assert!(slot.take().is_none());
        assert_eq!(
            slot.stats(),
            DisplayStats {
                published: 10,
                dropped: 9
            }
        );
    }

    #[test]
    fn test_slow_consumer_sees_fewer_events_ending_on_latest() {
        let slot = DisplaySlot::new();
        let mut events = Vec::new();

        for value in 1..=12u8 {
            slot.publish(frame(value));
            // Consumer only keeps up with every third frame
            if value % 3 == 0 {
                events.push(slot.take().unwrap());
            }
        }

        assert_eq!(events.len(), 4);
        assert!(events.len() < 12);
        assert_eq!(events.last().unwrap().frame.data[0], 12);
    }

    #[test]
    fn test_wait_take_times_out_when_empty() {
        let slot = DisplaySlot::new();
        assert!(slot.wait_take(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_wait_take_wakes_on_publish() {
        let slot = Arc::new(DisplaySlot::new());
        let producer = {
            let slot = slot.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                slot.publish(frame(7));
            })
        };

        let taken = slot.wait_take(Duration::from_secs(2)).unwrap();
        assert_eq!(taken.frame.data[0], 7);
        producer.join().unwrap();
    }
}
