//! Decode pipeline orchestration.
//!
//! Owns the decoder subprocess, the frame read loop, and the progress
//! monitor; mediates seeks (decoder restart) and hardware-acceleration
//! fallback; publishes notifications to the UI layer over a channel.

mod monitor;
pub mod source;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::video::buffer::FrameBuffer;
use crate::video::frame::Frame;
use crate::video::hwaccel::HwAccelMethod;
use crate::video::probe::{Probe, VideoSpec};
use source::{FrameSource, FrameStream, ReadOutcome, SourceError, SpawnSpec};

/// Ring capacity for the default streaming mode.
const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Errors surfaced by pipeline entry points.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline already running")]
    AlreadyRunning,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Notifications delivered to the UI layer.
///
/// Producers never block on delivery: the channel is unbounded and the
/// consumer drains it on its own schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    /// A new frame landed in the buffer; pull it with
    /// [`FrameBuffer::get_latest`].
    FrameReady,
    /// Estimated playback position moved (milliseconds).
    PositionChanged(u64),
    /// Total duration became known (milliseconds).
    DurationChanged(u64),
    /// The read loop drained its input and exited.
    EndOfStream,
}

/// Buffering strategy for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingMode {
    /// Stream while decoding, keeping only the most recent frames.
    Streaming { capacity: usize },
    /// Drain the entire file into memory before playback starts.
    Preload,
}

impl Default for BufferingMode {
    fn default() -> Self {
        Self::Streaming {
            capacity: DEFAULT_STREAM_CAPACITY,
        }
    }
}

/// Pipeline configuration, fixed for the duration of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub buffering: BufferingMode,
    /// Attempt hardware-accelerated decode. Changes apply on the next start.
    pub hw_acceleration: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffering: BufferingMode::default(),
            hw_acceleration: true,
        }
    }
}

/// A pending seek.
///
/// The read loop and the monitor react to a seek independently (decoder
/// restart vs. clock rebase), so the target is stored once per consumer and
/// each cell is taken exactly once.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SeekRequest {
    /// Consumed by the read loop: restart the decoder at this offset.
    pub(crate) decode: Option<u64>,
    /// Consumed by the monitor: rebase the position clock to this offset.
    pub(crate) clock: Option<u64>,
}

/// State shared between the caller, the read loop, and the monitor.
pub(crate) struct PipelineShared {
    pub(crate) spec: VideoSpec,
    pub(crate) buffer: Arc<FrameBuffer>,
    pub(crate) running: AtomicBool,
    pub(crate) position_ms: AtomicU64,
    pub(crate) seek: Mutex<SeekRequest>,
}

/// Orchestrates probing, the decoder subprocess, frame buffering, and
/// position tracking for one video file.
pub struct DecodePipeline {
    path: PathBuf,
    config: PipelineConfig,
    source: Arc<dyn FrameSource>,
    shared: Arc<PipelineShared>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
    decode_thread: Option<JoinHandle<()>>,
    monitor_thread: Option<JoinHandle<()>>,
}

impl DecodePipeline {
    /// Probe the input and set up a pipeline.
    ///
    /// Probing failures are not fatal: the pipeline falls back to a default
    /// spec so playback can still be attempted.
    pub fn new(
        path: impl Into<PathBuf>,
        config: PipelineConfig,
        source: Arc<dyn FrameSource>,
    ) -> Self {
        let path = path.into();
        let spec = match Probe::new().and_then(|probe| probe.probe(&path)) {
            Ok(spec) => {
                log::info!(
                    "video: {}x{} @ {:.3} fps, {} ms",
                    spec.width,
                    spec.height,
                    spec.frame_rate,
                    spec.duration_ms
                );
                spec
            }
            Err(e) => {
                log::warn!("probe failed ({e}), using fallback spec");
                VideoSpec::fallback()
            }
        };
        Self::with_spec(path, spec, config, source)
    }

    /// Set up a pipeline with a known spec, skipping the probe.
    pub fn with_spec(
        path: impl Into<PathBuf>,
        spec: VideoSpec,
        config: PipelineConfig,
        source: Arc<dyn FrameSource>,
    ) -> Self {
        let buffer = match config.buffering {
            BufferingMode::Streaming { capacity } => FrameBuffer::bounded(capacity),
            BufferingMode::Preload => FrameBuffer::unbounded(),
        };
        let shared = Arc::new(PipelineShared {
            spec,
            buffer: Arc::new(buffer),
            running: AtomicBool::new(false),
            position_ms: AtomicU64::new(0),
            seek: Mutex::new(SeekRequest::default()),
        });
        let (events_tx, events_rx) = unbounded();

        Self {
            path: path.into(),
            config,
            source,
            shared,
            events_tx,
            events_rx,
            decode_thread: None,
            monitor_thread: None,
        }
    }

    /// Stream properties for this pipeline.
    pub fn spec(&self) -> &VideoSpec {
        &self.shared.spec
    }

    /// Handle to the shared frame buffer, for the display poller.
    pub fn buffer(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.shared.buffer)
    }

    /// Receiver for pipeline notifications.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    /// Whether a run is active (set false by `stop()` or stream exhaustion).
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Latest position estimate in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.shared.position_ms.load(Ordering::Relaxed)
    }

    /// Enable or disable hardware acceleration. Effective on the next
    /// start, never mid-run.
    pub fn set_hardware_acceleration(&mut self, enabled: bool) {
        self.config.hw_acceleration = enabled;
    }

    /// Start playback.
    ///
    /// In preload mode this first drains the decoder's entire output into
    /// the buffer before the streaming run begins. A hardware-accelerated
    /// spawn failure silently downgrades to software; a software spawn
    /// failure is returned to the caller and the pipeline stays stopped.
    ///
    /// A pipeline whose previous run drained naturally can be started again
    /// without an explicit [`DecodePipeline::stop`]; only a still-active run
    /// is rejected.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        // A drained run leaves finished threads and stale frames behind;
        // reap them before replaying.
        if self.decode_thread.is_some() || self.monitor_thread.is_some() {
            self.stop();
        }

        self.shared.running.store(true, Ordering::Release);
        self.shared.position_ms.store(0, Ordering::Relaxed);
        *self.shared.seek.lock() = SeekRequest::default();

        if self.config.buffering == BufferingMode::Preload {
            if let Err(e) = self.preload() {
                self.shared.running.store(false, Ordering::Release);
                return Err(e);
            }
        }

        let _ = self
            .events_tx
            .send(PlayerEvent::DurationChanged(self.shared.spec.duration_ms));

        let method = if self.config.hw_acceleration {
            self.source.detect_hw_accel()
        } else {
            log::info!("hardware acceleration disabled by user");
            None
        };
        let (stream, method) = match self.spawn_first(method) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);
        let events = self.events_tx.clone();
        let input = self.path.clone();
        self.decode_thread = Some(thread::spawn(move || {
            decode_loop(shared, source, input, stream, method, events);
        }));

        let shared = Arc::clone(&self.shared);
        let events = self.events_tx.clone();
        self.monitor_thread = Some(thread::spawn(move || {
            monitor::run(shared, events);
        }));

        Ok(())
    }

    /// Request a jump to `position_ms`. Fire-and-forget: the read loop
    /// restarts the decoder and the monitor rebases its clock on their next
    /// iterations.
    pub fn seek(&self, position_ms: u64) {
        let mut seek = self.shared.seek.lock();
        seek.decode = Some(position_ms);
        seek.clock = Some(position_ms);
    }

    /// Stop playback: flip the running flag, join both loops, clear the
    /// buffer. Idempotent.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.decode_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.monitor_thread.take() {
            let _ = handle.join();
        }
        self.shared.buffer.clear();
    }

    /// Spawn the initial decoder run, downgrading a failed hardware spawn
    /// to software. Returns the stream and the method actually in effect.
    fn spawn_first(
        &self,
        method: Option<HwAccelMethod>,
    ) -> Result<(Box<dyn FrameStream>, Option<HwAccelMethod>), PipelineError> {
        let spec = SpawnSpec {
            input: self.path.clone(),
            hw_accel: method.clone(),
            start_ms: None,
        };
        match self.source.spawn(&spec) {
            Ok(stream) => Ok((stream, method)),
            Err(e) if method.is_some() => {
                log::warn!("hardware-accelerated spawn failed ({e}), using software decoding");
                let stream = self.source.spawn(&SpawnSpec::new(self.path.clone()))?;
                Ok((stream, None))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drain the whole file into the (unbounded) buffer.
    fn preload(&self) -> Result<(), PipelineError> {
        log::info!("preloading {:?} into memory", self.path);
        let mut stream = self.source.spawn(&SpawnSpec::new(self.path.clone()))?;

        let mut raw = vec![0u8; self.shared.spec.frame_size()];
        let mut loaded = 0u64;
        while self.shared.running.load(Ordering::Acquire) {
            match stream.read_frame(&mut raw) {
                ReadOutcome::Frame => {
                    let Some(frame) =
                        Frame::from_raw(&raw, self.shared.spec.width, self.shared.spec.height)
                    else {
                        break;
                    };
                    if !self.shared.buffer.push(frame) {
                        log::warn!("buffer rejected preload frame, stopping preload");
                        break;
                    }
                    loaded += 1;
                }
                ReadOutcome::EndOfStream => break,
            }
        }
        stream.terminate();
        log::info!("preloaded {loaded} frames");
        Ok(())
    }
}

impl Drop for DecodePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The frame read loop.
///
/// Reads one frame-sized block per iteration, pushing complete frames into
/// the buffer. A pending seek replaces the decoder process before the next
/// read. End of stream from a failed hardware run respawns the decoder
/// without acceleration; any other end of stream finishes the run.
fn decode_loop(
    shared: Arc<PipelineShared>,
    source: Arc<dyn FrameSource>,
    input: PathBuf,
    mut stream: Box<dyn FrameStream>,
    mut hw_method: Option<HwAccelMethod>,
    events: Sender<PlayerEvent>,
) {
    let mut raw = vec![0u8; shared.spec.frame_size()];

    while shared.running.load(Ordering::Acquire) {
        let target = shared.seek.lock().decode.take();
        if let Some(target_ms) = target {
            log::info!("seeking to {:.3} s", target_ms as f64 / 1000.0);
            stream.terminate();
            let spec = SpawnSpec {
                input: input.clone(),
                hw_accel: hw_method.clone(),
                start_ms: Some(target_ms),
            };
            match source.spawn(&spec) {
                Ok(replacement) => stream = replacement,
                Err(e) => {
                    log::error!("failed to restart decoder for seek: {e}");
                    break;
                }
            }
        }

        match stream.read_frame(&mut raw) {
            ReadOutcome::Frame => {
                let Some(frame) = Frame::from_raw(&raw, shared.spec.width, shared.spec.height)
                else {
                    log::error!("frame size mismatch, stopping read loop");
                    break;
                };
                if shared.buffer.push(frame) {
                    let _ = events.send(PlayerEvent::FrameReady);
                }
            }
            ReadOutcome::EndOfStream => {
                let failed = stream.failed();
                if failed && hw_method.is_some() && shared.running.load(Ordering::Acquire) {
                    log::warn!("hardware-accelerated decode failed, falling back to software");
                    hw_method = None;
                    match source.spawn(&SpawnSpec::new(input.clone())) {
                        Ok(replacement) => {
                            stream = replacement;
                            continue;
                        }
                        Err(e) => {
                            log::error!("software fallback spawn failed: {e}");
                            break;
                        }
                    }
                }
                break;
            }
        }
    }

    stream.terminate();
    // Stream exhaustion ends the run; the monitor observes the flag on its
    // next tick. Notify only on the transition so stop() stays quiet.
    if shared.running.swap(false, Ordering::AcqRel) {
        let _ = events.send(PlayerEvent::EndOfStream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::frame::frame_size;
    use std::time::Duration;

    /// Source handing out synthetic frames from a shared pool, so a preload
    /// pass and the following streaming pass split one "file".
    struct FakeSource {
        pool: Arc<Mutex<u64>>,
        hw: Option<HwAccelMethod>,
        fail_hw_runs: bool,
        read_delay: Duration,
        spawns: Arc<Mutex<Vec<SpawnSpec>>>,
    }

    impl FakeSource {
        fn with_frames(total: u64) -> Self {
            Self {
                pool: Arc::new(Mutex::new(total)),
                hw: None,
                fail_hw_runs: false,
                read_delay: Duration::ZERO,
                spawns: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn spawn_log(&self) -> Arc<Mutex<Vec<SpawnSpec>>> {
            Arc::clone(&self.spawns)
        }
    }

    impl FrameSource for FakeSource {
        fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn FrameStream>, SourceError> {
            self.spawns.lock().push(spec.clone());
            if self.fail_hw_runs && spec.hw_accel.is_some() {
                return Ok(Box::new(FailingStream));
            }
            Ok(Box::new(FakeStream {
                pool: Arc::clone(&self.pool),
                fill: 0,
                delay: self.read_delay,
            }))
        }

        fn detect_hw_accel(&self) -> Option<HwAccelMethod> {
            self.hw.clone()
        }
    }

    struct FakeStream {
        pool: Arc<Mutex<u64>>,
        fill: u8,
        delay: Duration,
    }

    impl FrameStream for FakeStream {
        fn read_frame(&mut self, buf: &mut [u8]) -> ReadOutcome {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            {
                let mut pool = self.pool.lock();
                if *pool == 0 {
                    return ReadOutcome::EndOfStream;
                }
                *pool -= 1;
            }
            buf.fill(self.fill);
            self.fill = self.fill.wrapping_add(1);
            ReadOutcome::Frame
        }

        fn terminate(&mut self) {}

        fn failed(&mut self) -> bool {
            false
        }
    }

    /// Stream standing in for a hardware run that exits non-zero at once.
    struct FailingStream;

    impl FrameStream for FailingStream {
        fn read_frame(&mut self, _buf: &mut [u8]) -> ReadOutcome {
            ReadOutcome::EndOfStream
        }

        fn terminate(&mut self) {}

        fn failed(&mut self) -> bool {
            true
        }
    }

    fn small_spec() -> VideoSpec {
        VideoSpec {
            width: 4,
            height: 4,
            frame_rate: 30.0,
            duration_ms: 1_000,
        }
    }

    fn wait_for_end_of_stream(events: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
        let mut seen = Vec::new();
        loop {
            let event = events
                .recv_timeout(Duration::from_secs(5))
                .expect("pipeline should reach end of stream");
            let done = event == PlayerEvent::EndOfStream;
            seen.push(event);
            if done {
                return seen;
            }
        }
    }

    #[test]
    fn preload_drains_whole_file_into_unbounded_buffer() {
        // 10 s at 30 fps of 640x480: the documented end-to-end scenario.
        let spec = VideoSpec {
            width: 640,
            height: 480,
            frame_rate: 30.0,
            duration_ms: 10_000,
        };
        let source = Arc::new(FakeSource::with_frames(300));
        let config = PipelineConfig {
            buffering: BufferingMode::Preload,
            hw_acceleration: false,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", spec, config, source);

        let events = pipeline.events();
        let buffer = pipeline.buffer();
        pipeline.start().unwrap();
        let seen = wait_for_end_of_stream(&events);

        assert_eq!(buffer.len(), 300);
        let latest = buffer.get_latest().unwrap();
        assert_eq!(latest.len(), frame_size(640, 480));
        assert!(seen.contains(&PlayerEvent::DurationChanged(10_000)));

        pipeline.stop();
        assert!(buffer.is_empty());
    }

    #[test]
    fn hardware_failure_falls_back_to_software_and_keeps_delivering() {
        let source = Arc::new(FakeSource {
            hw: Some(HwAccelMethod::Cuda),
            fail_hw_runs: true,
            ..FakeSource::with_frames(10)
        });
        let spawns = source.spawn_log();
        let config = PipelineConfig {
            buffering: BufferingMode::Streaming { capacity: 16 },
            hw_acceleration: true,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", small_spec(), config, source);

        let events = pipeline.events();
        let buffer = pipeline.buffer();
        pipeline.start().unwrap();
        let seen = wait_for_end_of_stream(&events);

        let spawns = spawns.lock();
        assert_eq!(spawns.len(), 2);
        assert_eq!(spawns[0].hw_accel, Some(HwAccelMethod::Cuda));
        assert_eq!(spawns[1].hw_accel, None);

        let delivered = seen
            .iter()
            .filter(|e| **e == PlayerEvent::FrameReady)
            .count();
        assert_eq!(delivered, 10);
        assert_eq!(buffer.len(), 10);

        pipeline.stop();
    }

    #[test]
    fn disabled_hw_acceleration_never_detects() {
        let source = Arc::new(FakeSource {
            hw: Some(HwAccelMethod::Cuda),
            ..FakeSource::with_frames(1)
        });
        let spawns = source.spawn_log();
        let config = PipelineConfig {
            buffering: BufferingMode::Streaming { capacity: 4 },
            hw_acceleration: false,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", small_spec(), config, source);

        let events = pipeline.events();
        pipeline.start().unwrap();
        wait_for_end_of_stream(&events);

        assert_eq!(spawns.lock()[0].hw_accel, None);
        pipeline.stop();
    }

    #[test]
    fn seek_restarts_decoder_at_target_and_rebases_position() {
        let source = Arc::new(FakeSource {
            read_delay: Duration::from_millis(1),
            ..FakeSource::with_frames(u64::MAX)
        });
        let spawns = source.spawn_log();
        let config = PipelineConfig {
            buffering: BufferingMode::Streaming { capacity: 8 },
            hw_acceleration: false,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", small_spec(), config, source);

        pipeline.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        pipeline.seek(5_000);

        // The read loop restarts the decoder with the seek offset...
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while spawns.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        {
            let spawns = spawns.lock();
            assert_eq!(spawns.len(), 2);
            assert_eq!(spawns[1].start_ms, Some(5_000));
        }

        // ...and the monitor rebases within a couple of ticks.
        std::thread::sleep(Duration::from_millis(350));
        let position = pipeline.position_ms();
        assert!(
            (5_000..6_500).contains(&position),
            "position {position} not rebased to seek target"
        );

        // The pending target is consumed exactly once.
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(spawns.lock().len(), 2);

        pipeline.stop();
    }

    #[test]
    fn stop_joins_loops_and_clears_buffer() {
        let source = Arc::new(FakeSource {
            read_delay: Duration::from_millis(1),
            ..FakeSource::with_frames(u64::MAX)
        });
        let config = PipelineConfig {
            buffering: BufferingMode::Streaming { capacity: 8 },
            hw_acceleration: false,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", small_spec(), config, source);

        let buffer = pipeline.buffer();
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        std::thread::sleep(Duration::from_millis(100));
        assert!(!buffer.is_empty());

        pipeline.stop();
        assert!(!pipeline.is_running());
        assert!(buffer.is_empty());
    }

    #[test]
    fn starting_twice_is_rejected() {
        let source = Arc::new(FakeSource {
            read_delay: Duration::from_millis(1),
            ..FakeSource::with_frames(u64::MAX)
        });
        let config = PipelineConfig {
            buffering: BufferingMode::Streaming { capacity: 8 },
            hw_acceleration: false,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", small_spec(), config, source);

        pipeline.start().unwrap();
        assert!(matches!(
            pipeline.start(),
            Err(PipelineError::AlreadyRunning)
        ));
        pipeline.stop();
    }

    #[test]
    fn replays_after_natural_end_of_stream() {
        let source = Arc::new(FakeSource::with_frames(5));
        let pool = Arc::clone(&source.pool);
        let spawns = source.spawn_log();
        let config = PipelineConfig {
            buffering: BufferingMode::Streaming { capacity: 8 },
            hw_acceleration: false,
        };
        let mut pipeline = DecodePipeline::with_spec("clip.mp4", small_spec(), config, source);

        let events = pipeline.events();
        let buffer = pipeline.buffer();
        pipeline.start().unwrap();
        wait_for_end_of_stream(&events);
        assert!(!pipeline.is_running());

        // Refill the pool and play again without an explicit stop().
        *pool.lock() = 3;
        pipeline.start().unwrap();
        let seen = wait_for_end_of_stream(&events);

        let delivered = seen
            .iter()
            .filter(|e| **e == PlayerEvent::FrameReady)
            .count();
        assert_eq!(delivered, 3);
        // Frames from the first run do not leak into the replay.
        assert_eq!(buffer.len(), 3);
        assert_eq!(spawns.lock().len(), 2);

        pipeline.stop();
    }
}
