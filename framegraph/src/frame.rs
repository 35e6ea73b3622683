//! Frame completion and queue timelines (component D).
//!
//! Grounded on `neptune_vulkan::device::AshQueue` for the notion of a
//! logical submission lane, generalized from "one queue handle" to a
//! timeline counter the core can wait on without touching a real semaphore.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

/// A logical submission lane. Persistent resources remember, implicitly via
/// their stamped wait-frames, which queue last touched them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct QueueId(pub u32);

pub const GRAPHICS_QUEUE: QueueId = QueueId(0);
pub const ASYNC_COMPUTE_QUEUE: QueueId = QueueId(1);
pub const ASYNC_TRANSFER_QUEUE: QueueId = QueueId(2);

/// A queue's timeline semaphore value, mirrored on the CPU side.
pub struct Queue {
    pub id: QueueId,
    timeline: AtomicU64,
}

impl Queue {
    pub fn new(id: QueueId) -> Self {
        Self {
            id,
            timeline: AtomicU64::new(0),
        }
    }

    /// Called once per submitted command buffer on this queue
    /// (`queueCommandBufferIndex += 1`, §4.I).
    pub fn next_submission_value(&self) -> u64 {
        self.timeline.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current_timeline_value(&self) -> u64 {
        self.timeline.load(Ordering::Acquire)
    }
}

/// Process-wide monotonically increasing frame counter plus the blocking
/// `waitForFrame` CPU suspension point (§5).
pub struct FrameCompletion {
    last_completed: Mutex<u64>,
    advanced: Condvar,
}

impl Default for FrameCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCompletion {
    pub fn new() -> Self {
        Self {
            last_completed: Mutex::new(0),
            advanced: Condvar::new(),
        }
    }

    pub fn current(&self) -> u64 {
        *self.last_completed.lock().unwrap()
    }

    /// Advance the counter to `frame`. No-op (and never moves backwards) if
    /// `frame` is not greater than the current value.
    pub fn advance_to(&self, frame: u64) {
        let mut guard = self.last_completed.lock().unwrap();
        if frame > *guard {
            *guard = frame;
            self.advanced.notify_all();
        }
    }

    /// Blocks the calling thread until `last_completed_frame >= frame`.
    pub fn wait_for_frame(&self, frame: u64) {
        let guard = self.last_completed.lock().unwrap();
        let _unused = self
            .advanced
            .wait_while(guard, |completed| *completed < frame)
            .unwrap();
    }
}

/// An inflight-frame counting semaphore: the executor blocks recording a new
/// frame until fewer than `inflight_count` frames are outstanding.
pub struct InflightSemaphore {
    permits: Mutex<u32>,
    released: Condvar,
    capacity: u32,
}

impl InflightSemaphore {
    pub fn new(capacity: u32) -> Self {
        Self {
            permits: Mutex::new(capacity),
            released: Condvar::new(),
            capacity,
        }
    }

    pub fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.released.wait(permits).unwrap();
        }
        *permits -= 1;
    }

    pub fn release(&self) {
        let mut permits = self.permits.lock().unwrap();
        debug_assert!(*permits < self.capacity);
        *permits += 1;
        self.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_for_frame_returns_immediately_once_already_reached() {
        let fc = FrameCompletion::new();
        fc.advance_to(7);
        fc.wait_for_frame(5);
        fc.wait_for_frame(7);
        assert_eq!(fc.current(), 7);
    }

    /// S5: a wait blocks until the frame advances past the stamped value.
    #[test]
    fn wait_for_frame_blocks_until_advanced() {
        let fc = Arc::new(FrameCompletion::new());
        let waiter = fc.clone();
        let handle = thread::spawn(move || {
            waiter.wait_for_frame(7);
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        fc.advance_to(6);
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        fc.advance_to(7);
        handle.join().unwrap();
    }

    #[test]
    fn queue_timeline_increments_per_submission() {
        let queue = Queue::new(GRAPHICS_QUEUE);
        assert_eq!(queue.next_submission_value(), 1);
        assert_eq!(queue.next_submission_value(), 2);
        assert_eq!(queue.current_timeline_value(), 2);
    }
}
