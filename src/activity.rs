use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::fingerprint::{self, Fingerprint};

/// Application that produced an activity file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// MyWhoosh cycling simulator
    SimulatorA,
    /// TrainingPeaks Virtual training platform
    SimulatorB,
    /// Neither directory nor content identified the producer
    Unknown,
}

impl SourceTag {
    /// Prefix given to archived files of this source
    pub fn backup_prefix(&self) -> Option<&'static str> {
        match self {
            SourceTag::SimulatorA => Some("MW_"),
            SourceTag::SimulatorB => Some("TPV_"),
            SourceTag::Unknown => None,
        }
    }

    /// Human-readable application name
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceTag::SimulatorA => "MyWhoosh",
            SourceTag::SimulatorB => "TrainingPeaks Virtual",
            SourceTag::Unknown => "Unknown source",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, SourceTag::Unknown)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A directory to scan, with the source it canonically belongs to
///
/// `hint` is `None` for shared locations where only the file content can
/// tell the producers apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    pub path: PathBuf,
    pub hint: Option<SourceTag>,
}

impl SourceRoot {
    pub fn new(path: impl Into<PathBuf>, hint: SourceTag) -> Self {
        Self {
            path: path.into(),
            hint: Some(hint),
        }
    }

    pub fn shared(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hint: None,
        }
    }
}

/// A candidate activity file found during a scan
///
/// The fingerprint is computed on first use and cached; the source tag can
/// be assigned exactly once.
#[derive(Debug)]
pub struct ActivityFile {
    path: PathBuf,
    root: SourceRoot,
    size: u64,
    modified: Option<DateTime<Utc>>,
    discovered_at: DateTime<Utc>,
    fingerprint: OnceLock<Fingerprint>,
    source: OnceLock<SourceTag>,
}

impl ActivityFile {
    pub fn new(
        path: PathBuf,
        root: SourceRoot,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            path,
            root,
            size,
            modified,
            discovered_at: Utc::now(),
            fingerprint: OnceLock::new(),
            source: OnceLock::new(),
        }
    }

    /// Build an activity file straight from a path on disk
    pub fn from_path(path: &Path, root: SourceRoot) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        Ok(Self::new(path.to_path_buf(), root, metadata.len(), modified))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &SourceRoot {
        &self.root
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// File name as a string, if it is valid UTF-8
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Content fingerprint, computed lazily and cached
    pub fn fingerprint(&self) -> io::Result<&Fingerprint> {
        if let Some(existing) = self.fingerprint.get() {
            return Ok(existing);
        }
        let computed = fingerprint::fingerprint(&self.path)?;
        Ok(self.fingerprint.get_or_init(|| computed))
    }

    /// Cached fingerprint without touching the disk
    pub fn cached_fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.get()
    }

    /// Assign the classification result
    ///
    /// Returns the tag that is now in effect; a second assignment is ignored.
    pub fn set_source(&self, tag: SourceTag) -> SourceTag {
        if let Err(rejected) = self.source.set(tag) {
            log::debug!(
                "Ignoring reclassification of {} as {}",
                self.path.display(),
                rejected
            );
        }
        self.source()
    }

    /// Classified source, `Unknown` until classification ran
    pub fn source(&self) -> SourceTag {
        self.source.get().copied().unwrap_or(SourceTag::Unknown)
    }

    pub fn is_classified(&self) -> bool {
        self.source.get().is_some()
    }
}
