//! Video domain types: frames, buffering, probing, and hardware acceleration.

pub mod buffer;
pub mod frame;
pub mod hwaccel;
pub mod probe;

pub use buffer::FrameBuffer;
pub use frame::Frame;
pub use hwaccel::HwAccelMethod;
pub use probe::{Probe, ProbeError, VideoSpec};
