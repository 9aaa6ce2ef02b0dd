//! Preview Player - headless playback harness
//!
//! Plays a file through the decode pipeline and reports frame delivery and
//! position on the console, standing in for the display layer.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use preview_player::{
    BufferingMode, DecodePipeline, FfmpegFrameSource, PipelineConfig, PlayerEvent,
};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Starting Preview Player v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        bail!("usage: preview-player <video> [--preload] [--no-hwaccel]");
    };
    let mut config = PipelineConfig::default();
    for flag in args {
        match flag.as_str() {
            "--preload" => config.buffering = BufferingMode::Preload,
            "--no-hwaccel" => config.hw_acceleration = false,
            other => bail!("unknown flag: {other}"),
        }
    }

    let source = Arc::new(FfmpegFrameSource::new().context("ffmpeg not found on PATH")?);
    let mut pipeline = DecodePipeline::new(path, config, source);

    let events = pipeline.events();
    let buffer = pipeline.buffer();
    let poll_interval = pipeline.spec().frame_interval();
    pipeline.start()?;

    let mut frames_seen = 0u64;
    'playback: loop {
        // Drain notifications, then pull the newest frame like a display would.
        while let Ok(event) = events.try_recv() {
            match event {
                PlayerEvent::DurationChanged(ms) => log::info!("duration: {ms} ms"),
                PlayerEvent::PositionChanged(ms) => log::debug!("position: {ms} ms"),
                PlayerEvent::FrameReady => frames_seen += 1,
                PlayerEvent::EndOfStream => break 'playback,
            }
        }
        if let Some(frame) = buffer.get_latest() {
            log::trace!("latest frame: {} bytes", frame.len());
        }
        std::thread::sleep(poll_interval);
    }

    log::info!(
        "playback finished after {frames_seen} frames at {} ms",
        pipeline.position_ms()
    );
    pipeline.stop();
    Ok(())
}
