//! Container metadata probing via ffprobe.
//!
//! Probing is best-effort: callers fall back to [`VideoSpec::fallback`] when
//! a file cannot be inspected, so playback never blocks on unobtainable
//! metadata.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use super::frame::frame_size;

/// Fallback values used when probing fails outright.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FRAME_RATE: f64 = 30.0;
pub const DEFAULT_DURATION_MS: u64 = 60_000;

/// How long the frame-count duration fallback may run before we give up on
/// it. Counting frames decodes the whole file, which can take a while.
const FRAME_COUNT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur while probing a video file.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("ffprobe binary not found")]
    BinaryNotFound,
    #[error("failed to run ffprobe: {0}")]
    Invocation(#[from] std::io::Error),
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),
    #[error("missing stream field: {0}")]
    MissingField(&'static str),
    #[error("malformed frame rate: {0:?}")]
    MalformedFrameRate(String),
}

/// Static description of a video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub duration_ms: u64,
}

impl VideoSpec {
    /// Hard-coded defaults used when probing fails.
    pub fn fallback() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_rate: DEFAULT_FRAME_RATE,
            duration_ms: DEFAULT_DURATION_MS,
        }
    }

    /// Size in bytes of one raw frame at this resolution.
    pub fn frame_size(&self) -> usize {
        frame_size(self.width, self.height)
    }

    /// Wall-clock interval between frames, floored at one millisecond for
    /// very high frame rates.
    pub fn frame_interval(&self) -> Duration {
        if self.frame_rate <= 0.0 {
            return Duration::from_millis(1000 / DEFAULT_FRAME_RATE as u64);
        }
        Duration::from_secs_f64((1.0 / self.frame_rate).max(0.001))
    }
}

/// Queries video metadata through the ffprobe binary.
pub struct Probe {
    ffprobe: PathBuf,
}

impl Probe {
    /// Locate ffprobe on the system path.
    pub fn new() -> Result<Self, ProbeError> {
        let ffprobe = which::which("ffprobe").map_err(|_| ProbeError::BinaryNotFound)?;
        Ok(Self { ffprobe })
    }

    /// Probe with an explicit ffprobe binary.
    pub fn with_binary(ffprobe: PathBuf) -> Self {
        Self { ffprobe }
    }

    /// Inspect the first video stream of `input`.
    ///
    /// Width, height and frame rate must be present. A missing container
    /// duration falls back to a frame-count estimate, and past the count
    /// timeout to [`DEFAULT_DURATION_MS`].
    pub fn probe(&self, input: &Path) -> Result<VideoSpec, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,duration",
                "-of",
                "default=noprint_wrappers=1",
            ])
            .arg(input)
            .output()?;

        if !output.status.success() {
            return Err(ProbeError::ProbeFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let fields = StreamFields::parse(&text)?;

        let duration_ms = match fields.duration_ms {
            Some(ms) => ms,
            None => {
                log::debug!("container duration unavailable, counting frames");
                self.estimate_duration(input, fields.frame_rate)
            }
        };

        Ok(VideoSpec {
            width: fields.width,
            height: fields.height,
            frame_rate: fields.frame_rate,
            duration_ms,
        })
    }

    /// Duration fallback: decode-count the frames, bounded by a timeout.
    ///
    /// The count runs on a helper thread so the caller can give up after
    /// [`FRAME_COUNT_TIMEOUT`] and settle for the constant default.
    fn estimate_duration(&self, input: &Path, frame_rate: f64) -> u64 {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let ffprobe = self.ffprobe.clone();
        let input = input.to_path_buf();
        thread::spawn(move || {
            let result = Command::new(&ffprobe)
                .args([
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-count_frames",
                    "-show_entries",
                    "stream=nb_read_frames",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ])
                .arg(&input)
                .output();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(FRAME_COUNT_TIMEOUT) {
            Ok(Ok(output)) if output.status.success() => {
                let count = String::from_utf8_lossy(&output.stdout)
                    .trim()
                    .parse::<u64>()
                    .ok();
                match count {
                    Some(frames) => duration_from_frame_count(frames, frame_rate),
                    None => DEFAULT_DURATION_MS,
                }
            }
            Ok(_) => {
                log::warn!("frame-count probe failed, using default duration");
                DEFAULT_DURATION_MS
            }
            Err(_) => {
                log::warn!(
                    "frame-count probe exceeded {}s, using default duration",
                    FRAME_COUNT_TIMEOUT.as_secs()
                );
                DEFAULT_DURATION_MS
            }
        }
    }
}

/// Milliseconds of playback represented by `frames` at `frame_rate`.
///
/// An unusable rate falls back to [`DEFAULT_DURATION_MS`].
fn duration_from_frame_count(frames: u64, frame_rate: f64) -> u64 {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return DEFAULT_DURATION_MS;
    }
    (frames as f64 / frame_rate * 1000.0).round() as u64
}

/// Fields pulled out of ffprobe's line-oriented `key=value` dump.
struct StreamFields {
    width: u32,
    height: u32,
    frame_rate: f64,
    duration_ms: Option<u64>,
}

impl StreamFields {
    fn parse(text: &str) -> Result<Self, ProbeError> {
        let mut width = None;
        let mut height = None;
        let mut frame_rate = None;
        let mut duration_ms = None;

        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            match key {
                "width" => width = value.parse::<u32>().ok(),
                "height" => height = value.parse::<u32>().ok(),
                "r_frame_rate" => frame_rate = Some(parse_frame_rate(value)?),
                "duration" => {
                    // "N/A" or garbage means the container does not know.
                    duration_ms = value
                        .parse::<f64>()
                        .ok()
                        .filter(|secs| *secs >= 0.0)
                        .map(|secs| (secs * 1000.0).round() as u64);
                }
                _ => {}
            }
        }

        Ok(Self {
            width: width.ok_or(ProbeError::MissingField("width"))?,
            height: height.ok_or(ProbeError::MissingField("height"))?,
            frame_rate: frame_rate.ok_or(ProbeError::MissingField("r_frame_rate"))?,
            duration_ms,
        })
    }
}

/// Parse a frame rate in ffprobe's rational `num/den` form.
///
/// A plain number (`"25"`) is accepted as-is; anything else is an error.
pub fn parse_frame_rate(value: &str) -> Result<f64, ProbeError> {
    let value = value.trim();
    let malformed = || ProbeError::MalformedFrameRate(value.to_string());

    if let Some((num, den)) = value.split_once('/') {
        let num: f64 = num.trim().parse().map_err(|_| malformed())?;
        let den: f64 = den.trim().parse().map_err(|_| malformed())?;
        if den <= 0.0 || !num.is_finite() || !den.is_finite() {
            return Err(malformed());
        }
        Ok(num / den)
    } else {
        value
            .parse::<f64>()
            .ok()
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .ok_or_else(malformed)
    }
}
