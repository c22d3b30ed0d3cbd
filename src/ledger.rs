use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::activity::SourceTag;
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;

/// On-disk format version of the ledger file
const LEDGER_VERSION: u32 = 1;

/// A file that has been uploaded and archived (or marked as processed by hand)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub source: SourceTag,
    pub uploaded_at: DateTime<Utc>,

    /// Name of the file when it was processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Archived copy; `None` for entries marked processed without an upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,

    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: Vec<LedgerEntry>,
}

/// Persistent record of processed fingerprints
///
/// The ledger is the only authority on whether a file was already handled.
/// It is loaded once when a run starts and flushed after every recorded
/// upload, so an interrupted run leaves it consistent with the work done.
#[derive(Debug)]
pub struct ProcessedFileLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
    known: HashSet<Fingerprint>,
}

impl ProcessedFileLedger {
    /// Empty ledger that will persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
            known: HashSet::new(),
        }
    }

    /// Load the ledger at `path`; a missing file is an empty ledger
    ///
    /// Any other read or parse failure is returned, since running with a
    /// damaged ledger would upload files a second time.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No ledger at {}, starting empty", path.display());
                return Ok(Self::new(path));
            }
            Err(source) => return Err(LedgerError::Unreadable { path, source }),
        };

        let file: LedgerFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(source) => return Err(LedgerError::Corrupted { path, source }),
        };

        if file.version != LEDGER_VERSION {
            return Err(LedgerError::UnsupportedVersion {
                found: file.version,
                expected: LEDGER_VERSION,
            });
        }

        let mut ledger = Self::new(path);
        for entry in file.entries {
            if ledger.known.insert(entry.fingerprint.clone()) {
                ledger.entries.push(entry);
            } else {
                log::warn!(
                    "Ignoring repeated ledger entry for {}",
                    entry.fingerprint
                );
            }
        }

        log::debug!(
            "Loaded {} ledger entries from {}",
            ledger.entries.len(),
            ledger.path.display()
        );
        Ok(ledger)
    }

    /// Write the ledger atomically (temp file, then rename)
    pub fn persist(&self) -> Result<(), LedgerError> {
        let persist_err = |source: io::Error| LedgerError::PersistFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(persist_err)?;
            }
        }

        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: self.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| persist_err(io::Error::other(e)))?;

        let temp_path = self.temp_path();
        fs::write(&temp_path, content).map_err(persist_err)?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            persist_err(e)
        })?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.known.contains(fingerprint)
    }

    /// Add an entry for an uploaded and archived file
    pub fn record(
        &mut self,
        fingerprint: Fingerprint,
        source: SourceTag,
        backup_path: &Path,
    ) -> Result<&LedgerEntry, LedgerError> {
        self.insert(LedgerEntry {
            fingerprint,
            source,
            uploaded_at: Utc::now(),
            file_name: backup_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            backup_path: Some(backup_path.to_path_buf()),
            manual: false,
        })
    }

    /// Record and flush in one step, undoing the in-memory record if the flush fails
    pub fn commit(
        &mut self,
        fingerprint: Fingerprint,
        source: SourceTag,
        backup_path: &Path,
    ) -> Result<(), LedgerError> {
        self.record(fingerprint.clone(), source, backup_path)?;
        if let Err(e) = self.persist() {
            self.remove(&fingerprint);
            return Err(e);
        }
        Ok(())
    }

    /// Mark a file as processed without uploading it
    pub fn mark_processed(
        &mut self,
        fingerprint: Fingerprint,
        source: SourceTag,
        file_name: &str,
    ) -> Result<&LedgerEntry, LedgerError> {
        self.insert(LedgerEntry {
            fingerprint,
            source,
            uploaded_at: Utc::now(),
            file_name: Some(file_name.to_string()),
            backup_path: None,
            manual: true,
        })
    }

    /// Drop a fingerprint so the file is treated as new on the next run
    pub fn forget(&mut self, fingerprint: &Fingerprint) -> Option<LedgerEntry> {
        self.remove(fingerprint)
    }

    fn insert(&mut self, entry: LedgerEntry) -> Result<&LedgerEntry, LedgerError> {
        if !self.known.insert(entry.fingerprint.clone()) {
            return Err(LedgerError::DuplicateEntry(entry.fingerprint));
        }
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        Ok(&self.entries[last])
    }

    fn remove(&mut self, fingerprint: &Fingerprint) -> Option<LedgerEntry> {
        if !self.known.remove(fingerprint) {
            return None;
        }
        let index = self
            .entries
            .iter()
            .position(|e| &e.fingerprint == fingerprint)?;
        Some(self.entries.remove(index))
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| &e.fingerprint == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
