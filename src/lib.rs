//! Preview Player Core
//!
//! Frame-acquisition pipeline for scrubbable playback of raw video frames
//! decoded by an external FFmpeg process.

pub mod approval;
pub mod pipeline;
pub mod video;

// Re-export commonly used types
pub use approval::{ApprovalStatus, ApprovalStore};
pub use pipeline::source::{
    FfmpegFrameSource, FrameSource, FrameStream, ReadOutcome, SourceError, SpawnSpec,
};
pub use pipeline::{BufferingMode, DecodePipeline, PipelineConfig, PipelineError, PlayerEvent};
pub use video::{Frame, FrameBuffer, HwAccelMethod, Probe, ProbeError, VideoSpec};
