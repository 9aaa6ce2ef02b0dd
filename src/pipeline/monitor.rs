//! Wall-clock playback position tracking.
//!
//! The decoder exposes no per-frame timestamps in raw pipe mode, so position
//! is estimated from elapsed wall-clock time since a rebasable origin. This
//! is a deliberate approximation: a seek rebases the origin so subsequent
//! estimates stay continuous with the seek target.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::{PipelineShared, PlayerEvent};

/// Position update cadence.
pub(crate) const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Tick until the pipeline stops: publish the elapsed-time position, then
/// consume a pending clock seek by rebasing the origin to `now - target`.
pub(crate) fn run(shared: Arc<PipelineShared>, events: Sender<PlayerEvent>) {
    let mut origin = Instant::now();

    while shared.running.load(Ordering::Acquire) {
        let position_ms = origin.elapsed().as_millis() as u64;
        shared.position_ms.store(position_ms, Ordering::Relaxed);
        let _ = events.send(PlayerEvent::PositionChanged(position_ms));

        let target = shared.seek.lock().clock.take();
        if let Some(target_ms) = target {
            origin = Instant::now() - Duration::from_millis(target_ms);
            shared.position_ms.store(target_ms, Ordering::Relaxed);
        }

        thread::sleep(TICK_INTERVAL);
    }
}
