//! Thread-safe frame buffer shared between the decode loop and the display
//! poller.
//!
//! Lock acquisition for `push` and `get_latest` is bounded: a frame dropped
//! under contention is a visual skip, a loop stuck on a lock is a frozen
//! pipeline.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use super::frame::Frame;

/// How long `push` and `get_latest` wait for the lock before giving up.
const LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Buffer sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capacity {
    /// Ring buffer: at capacity the oldest frame is evicted first.
    Bounded(usize),
    /// No eviction. Only used for whole-file preload.
    Unbounded,
}

/// Ordered container of decoded frames, newest last.
pub struct FrameBuffer {
    frames: Mutex<VecDeque<Frame>>,
    capacity: Capacity,
}

impl FrameBuffer {
    /// Ring buffer holding at most `max_size` frames.
    pub fn bounded(max_size: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(max_size)),
            capacity: Capacity::Bounded(max_size),
        }
    }

    /// Buffer without an eviction limit, for whole-file preload.
    pub fn unbounded() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            capacity: Capacity::Unbounded,
        }
    }

    /// Append a frame, evicting the oldest one first when at capacity.
    ///
    /// Returns `false` if the lock could not be acquired within the timeout;
    /// the frame is dropped and the buffer is left untouched. Producers must
    /// treat that as non-fatal.
    pub fn push(&self, frame: Frame) -> bool {
        let Some(mut frames) = self.frames.try_lock_for(LOCK_TIMEOUT) else {
            log::warn!("frame buffer contended, dropping frame");
            return false;
        };
        if let Capacity::Bounded(max_size) = self.capacity {
            if frames.len() >= max_size {
                frames.pop_front();
            }
        }
        frames.push_back(frame);
        true
    }

    /// The most recently pushed frame, or `None` if the buffer is empty or
    /// the lock could not be acquired within the timeout.
    pub fn get_latest(&self) -> Option<Frame> {
        let frames = self.frames.try_lock_for(LOCK_TIMEOUT)?;
        frames.back().cloned()
    }

    /// Empty the buffer.
    ///
    /// Blocks until the lock is held; only called during shutdown when the
    /// producer and consumer loops have already exited.
    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Number of buffered frames.
    ///
    /// Blocks until the lock is held, like [`FrameBuffer::clear`]: a
    /// diagnostic accessor, not for use inside the decode loop.
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether the buffer holds no frames. Blocking, see [`FrameBuffer::len`].
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}
