//! Typed errors for the detection, ledger and archive layers.
//!
//! Command handlers wrap these in `anyhow` with context; the orchestrator
//! matches on them to decide which outcome a file ends in.

use std::path::PathBuf;
use thiserror::Error;

use crate::activity::SourceTag;
use crate::fingerprint::Fingerprint;

/// Failures of the processed-file ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger at {path} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger at {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Ledger at {path} could not be written: {source}")]
    PersistFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported ledger version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Fingerprint {0} is already recorded")]
    DuplicateEntry(Fingerprint),
}

/// Failures of the backup archiver
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Backup destination already exists: {0}")]
    Collision(PathBuf),

    #[error("Cannot archive a file of source {0}")]
    UnsupportedSource(SourceTag),

    #[error("File has no usable name: {0}")]
    InvalidName(PathBuf),

    #[error("Copy of {path} failed verification: {reason}")]
    VerificationFailed { path: PathBuf, reason: String },

    #[error("I/O error while archiving {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures of structural FIT inspection
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a FIT file: {reason}")]
    NotFit { reason: String },
}
