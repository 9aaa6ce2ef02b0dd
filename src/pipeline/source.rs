//! Frame source abstraction over the external decoder process.
//!
//! The decoder is a version-uncontrolled external binary, so the pipeline
//! talks to it through the [`FrameSource`] / [`FrameStream`] traits and can
//! be tested against fakes emitting synthetic frames and failures.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;

use crate::video::hwaccel::{HwAccelMethod, HwAccelSelector};

/// Errors that can occur when spawning a decoder run.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("decoder binary not found")]
    DecoderNotFound,
    #[error("failed to spawn decoder process: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("decoder produced no output pipe")]
    MissingOutput,
}

/// Arguments for one decoder subprocess run.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    /// Input file to decode.
    pub input: PathBuf,
    /// Hardware backend to request, if any.
    pub hw_accel: Option<HwAccelMethod>,
    /// Start offset in milliseconds (seek).
    pub start_ms: Option<u64>,
}

impl SpawnSpec {
    /// Spec for decoding `input` from the start with software decode.
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            hw_accel: None,
            start_ms: None,
        }
    }
}

/// What a single frame read produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete frame was read into the caller's buffer.
    Frame,
    /// The stream ended. A short read counts as end of stream, not an error.
    EndOfStream,
}

/// A running decoder emitting fixed-size raw frames on a byte pipe.
pub trait FrameStream: Send {
    /// Read exactly one frame-sized block into `buf`.
    fn read_frame(&mut self, buf: &mut [u8]) -> ReadOutcome;

    /// Kill the underlying process. Safe to call more than once.
    fn terminate(&mut self);

    /// Whether the stream ended because the decoder failed (non-zero exit).
    ///
    /// Only meaningful after [`read_frame`](FrameStream::read_frame) has
    /// returned [`ReadOutcome::EndOfStream`]; a stream we terminated
    /// ourselves never counts as failed.
    fn failed(&mut self) -> bool;
}

/// Factory for decoder runs.
pub trait FrameSource: Send + Sync {
    /// Start one decoder run.
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn FrameStream>, SourceError>;

    /// Best available hardware backend, if the source supports any.
    fn detect_hw_accel(&self) -> Option<HwAccelMethod> {
        None
    }
}

/// [`FrameSource`] backed by an ffmpeg subprocess streaming packed RGB24
/// raw frames at a constant frame rate on stdout.
pub struct FfmpegFrameSource {
    ffmpeg: PathBuf,
}

impl FfmpegFrameSource {
    /// Locate ffmpeg on the system path.
    pub fn new() -> Result<Self, SourceError> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| SourceError::DecoderNotFound)?;
        Ok(Self { ffmpeg })
    }

    /// Source with an explicit ffmpeg binary.
    pub fn with_binary(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    fn build_command(&self, spec: &SpawnSpec) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostats"]);
        if let Some(method) = &spec.hw_accel {
            cmd.args(["-hwaccel", method.as_flag()]);
        }
        if let Some(start_ms) = spec.start_ms {
            // Seek offset in seconds with millisecond precision.
            cmd.arg("-ss")
                .arg(format!("{:.3}", start_ms as f64 / 1000.0));
        }
        cmd.arg("-i").arg(&spec.input);
        cmd.args([
            "-f", "image2pipe", "-pix_fmt", "rgb24", "-vcodec", "rawvideo", "-vsync", "cfr", "-",
        ]);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl FrameSource for FfmpegFrameSource {
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn FrameStream>, SourceError> {
        let mut cmd = self.build_command(spec);
        log::debug!("spawning decoder: {cmd:?}");
        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().ok_or(SourceError::MissingOutput)?;

        // Drain stderr on a helper thread so the decoder can never stall on a
        // full diagnostics pipe; keep the tail around for failure reports.
        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = Arc::clone(&stderr_tail);
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    log::debug!("decoder: {line}");
                    let mut tail = tail.lock();
                    tail.clear();
                    tail.push_str(&line);
                }
            });
        }

        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            stderr_tail,
            terminated: false,
        }))
    }

    fn detect_hw_accel(&self) -> Option<HwAccelMethod> {
        HwAccelSelector::new(self.ffmpeg.clone()).detect()
    }
}

/// One running ffmpeg decode process.
struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<String>>,
    terminated: bool,
}

impl FrameStream for FfmpegStream {
    fn read_frame(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => return ReadOutcome::EndOfStream,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("decoder read error: {e}");
                    return ReadOutcome::EndOfStream;
                }
            }
        }
        ReadOutcome::Frame
    }

    fn terminate(&mut self) {
        if !self.terminated {
            self.terminated = true;
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    fn failed(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        // The stream has hit EOF, so the process has exited or is about to.
        match self.child.wait() {
            Ok(status) if !status.success() => {
                let tail = self.stderr_tail.lock();
                log::warn!("decoder exited with {status}: {tail}");
                true
            }
            _ => false,
        }
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn command_requests_raw_rgb_at_constant_rate() {
        let source = FfmpegFrameSource::with_binary(PathBuf::from("ffmpeg"));
        let args = args_of(&source.build_command(&SpawnSpec::new("clip.mp4")));
        assert!(!args.contains(&"-hwaccel".to_string()));
        assert!(!args.contains(&"-ss".to_string()));
        for expected in ["image2pipe", "rgb24", "rawvideo", "cfr", "-"] {
            assert!(args.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn command_places_accel_and_seek_before_input() {
        let source = FfmpegFrameSource::with_binary(PathBuf::from("ffmpeg"));
        let spec = SpawnSpec {
            input: PathBuf::from("clip.mp4"),
            hw_accel: Some(HwAccelMethod::Cuda),
            start_ms: Some(12_345),
        };
        let args = args_of(&source.build_command(&spec));

        let hwaccel = args.iter().position(|a| a == "-hwaccel").unwrap();
        assert_eq!(args[hwaccel + 1], "cuda");
        let seek = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[seek + 1], "12.345");
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(hwaccel < input && seek < input);
    }
}
