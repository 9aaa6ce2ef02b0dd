//! Review approval persistence.
//!
//! The surrounding application tags each reviewed file as approved or
//! rejected. Tags live in an `approval.json` map keyed by file basename,
//! stored next to the videos being reviewed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Review verdict for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

/// JSON-backed map of file basenames to their review verdicts.
pub struct ApprovalStore {
    path: PathBuf,
}

impl ApprovalStore {
    /// Store backed by `approval.json` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join("approval.json"),
        }
    }

    /// Store for the directory containing `video`.
    pub fn for_video(video: &Path) -> Self {
        let dir = video.parent().unwrap_or_else(|| Path::new("."));
        Self::in_dir(dir)
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verdict recorded for `video`, if any.
    ///
    /// A missing or unreadable store reads as "no verdict".
    pub fn status_of(&self, video: &Path) -> Option<ApprovalStatus> {
        let name = video.file_name()?.to_str()?;
        self.load().ok()?.get(name).copied()
    }

    /// Record a verdict for `video`, replacing any existing one.
    pub fn set_status(&self, video: &Path, status: ApprovalStatus) -> Result<()> {
        let name = basename(video)?;
        // A malformed store is replaced rather than surfaced.
        let mut entries = self.load().unwrap_or_default();
        entries.insert(name.to_string(), status);
        self.save(&entries)
    }

    fn load(&self) -> Result<BTreeMap<String, ApprovalStatus>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {:?}", self.path))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {:?}", self.path))
    }

    /// Atomic write: serialize to a sibling temp file, then rename over the
    /// store so readers never observe a partial map.
    fn save(&self, entries: &BTreeMap<String, ApprovalStatus>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {tmp:?}"))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replacing {:?}", self.path))?;
        Ok(())
    }
}

fn basename(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("path has no usable file name: {path:?}"))
}
