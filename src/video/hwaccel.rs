//! Hardware acceleration detection and selection.
//!
//! FFmpeg enumerates its acceleration backends one per line; we rank them by
//! a fixed preference order and always keep software decode as the fallback.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

/// Backend names ranked by expected decode performance.
const PREFERRED_METHODS: [&str; 5] = ["cuda", "amf", "qsv", "d3d11va", "dxva2"];

/// A named decoder acceleration backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwAccelMethod {
    Cuda,
    Amf,
    Qsv,
    D3d11va,
    Dxva2,
    /// Backend we do not rank but ffmpeg still exposes (videotoolbox, vaapi, ...).
    Other(String),
}

impl HwAccelMethod {
    /// Method matching an enumerated name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "cuda" => Self::Cuda,
            "amf" => Self::Amf,
            "qsv" => Self::Qsv,
            "d3d11va" => Self::D3d11va,
            "dxva2" => Self::Dxva2,
            other => Self::Other(other.to_string()),
        }
    }

    /// Name as understood by ffmpeg's `-hwaccel` flag.
    pub fn as_flag(&self) -> &str {
        match self {
            Self::Cuda => "cuda",
            Self::Amf => "amf",
            Self::Qsv => "qsv",
            Self::D3d11va => "d3d11va",
            Self::Dxva2 => "dxva2",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for HwAccelMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

/// Parse `ffmpeg -hwaccels` output: one method per line, with a header line
/// ("Hardware acceleration methods:") that must be skipped when present.
pub fn parse_enumeration(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Pick the best method from an enumeration listing.
///
/// The first preferred match wins; if none of the ranked methods is present
/// but the set is non-empty, the first enumerated entry is used.
pub fn select_method(available: &[String]) -> Option<HwAccelMethod> {
    for preferred in PREFERRED_METHODS {
        if available.iter().any(|name| name == preferred) {
            return Some(HwAccelMethod::from_name(preferred));
        }
    }
    available.first().map(|name| HwAccelMethod::from_name(name))
}

/// One-shot query of the decoder toolchain's acceleration backends.
///
/// Detection runs once per playback session, not per frame, and is never
/// cached across runs.
pub struct HwAccelSelector {
    ffmpeg: PathBuf,
}

impl HwAccelSelector {
    pub fn new(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }

    /// Enumerate and rank the available backends.
    ///
    /// Any failure to enumerate means software decode: `None`.
    pub fn detect(&self) -> Option<HwAccelMethod> {
        let output = match Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-hwaccels"])
            .output()
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                log::warn!(
                    "hwaccel enumeration exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return None;
            }
            Err(e) => {
                log::warn!("could not enumerate hardware accelerators: {e}");
                return None;
            }
        };

        let available = parse_enumeration(&String::from_utf8_lossy(&output.stdout));
        match select_method(&available) {
            Some(method) => {
                log::info!(
                    "hardware acceleration methods [{}], selected {method}",
                    available.join(", ")
                );
                Some(method)
            }
            None => {
                log::info!("no hardware acceleration available, using software decoding");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn enumeration_skips_header_and_blanks() {
        let output = "Hardware acceleration methods:\nvideotoolbox\ncuda\n\n";
        assert_eq!(parse_enumeration(output), names(&["videotoolbox", "cuda"]));
    }

    #[test]
    fn preference_order_wins_over_listing_order() {
        let available = names(&["dxva2", "qsv", "cuda"]);
        assert_eq!(select_method(&available), Some(HwAccelMethod::Cuda));

        let available = names(&["dxva2", "qsv"]);
        assert_eq!(select_method(&available), Some(HwAccelMethod::Qsv));
    }

    #[test]
    fn unranked_methods_fall_back_to_first_entry() {
        let available = names(&["videotoolbox", "vaapi"]);
        assert_eq!(
            select_method(&available),
            Some(HwAccelMethod::Other("videotoolbox".to_string()))
        );
    }

    #[test]
    fn empty_enumeration_selects_nothing() {
        assert_eq!(select_method(&[]), None);
    }

    #[test]
    fn method_round_trips_through_flag_name() {
        for name in ["cuda", "amf", "qsv", "d3d11va", "dxva2", "vaapi"] {
            assert_eq!(HwAccelMethod::from_name(name).as_flag(), name);
        }
    }
}
