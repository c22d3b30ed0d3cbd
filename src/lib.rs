//! # fit-uploader
//!
//! Detects FIT activity files written by the MyWhoosh and TrainingPeaks
//! Virtual cycling simulators, uploads each new one exactly once to a fitness
//! service and moves it into a shared backup directory.
//!
//! ## Overview
//!
//! A run scans the configured (or auto-detected) source directories, works
//! out which application produced each file, skips files whose content was
//! already processed, and dispatches the rest to a small pool of upload
//! workers. After a successful upload the file is moved to the backup
//! directory as `MW_<name>` or `TPV_<name>` and its content fingerprint is
//! recorded in a persistent ledger.
//!
//! ## Key Features
//!
//! - **Content dedup**: files are identified by a SHA-256 of their bytes, not their names
//! - **Source detection**: directory of origin first, embedded producer markers as fallback
//! - **Bounded retries**: temporary upload failures are retried a configurable number of times
//! - **Safe backups**: existing backups are never overwritten; cross-device moves are verified
//! - **Crash safety**: the ledger is flushed after every archived file
//!
//! ## Architecture
//!
//! - Configuration ([`config`], [`settings`], [`sources`])
//! - File identity and discovery ([`activity`], [`fingerprint`], [`scanner`])
//! - Source detection ([`classifier`])
//! - Persistence and backup ([`ledger`], [`archive`])
//! - Upload coordination ([`upload`], [`orchestrator`])
//! - User interface and reporting ([`handlers`], [`onboarding`], [`report`], [`logger`])

/// Activity file and source tag types.
///
/// An [`activity::ActivityFile`] is a candidate found during a scan; its
/// fingerprint and detected source are computed once and cached.
pub mod activity;

/// Moving uploaded files into the backup directory.
///
/// Renames within a filesystem and falls back to copy, verify and delete
/// across filesystems. Never overwrites an existing backup.
pub mod archive;

/// Source detection from directory of origin and file content.
pub mod classifier;

/// Platform-agnostic configuration directory management for fit-uploader.
///
/// Provides utilities for locating and managing configuration files and directories
/// following platform conventions (XDG on Linux, Application Support on macOS,
/// AppData on Windows).
pub mod config;

/// Typed errors for the ledger, archive and inspection layers.
pub mod error;

/// Content fingerprints (SHA-256 of the file bytes).
pub mod fingerprint;

/// Command handlers for the CLI.
pub mod handlers;

/// Persistent set of processed fingerprints.
///
/// Stored as versioned JSON and written atomically after every recorded
/// upload so an interrupted run never uploads a recorded file twice.
pub mod ledger;

/// Logging configuration and utilities.
///
/// Sets up logging to the console (configurable via `RUST_LOG`) and a
/// persistent log file in the config directory, with size-based rotation.
pub mod logger;

/// Interactive first-run setup.
///
/// Prompts for the backup directory, the TrainingPeaks Virtual directory,
/// the account and the upload command.
pub mod onboarding;

/// Per-run state machine and bounded upload worker pool.
pub mod orchestrator;

/// Run reports in Markdown, JSON and console form.
pub mod report;

/// Directory scanning for activity files.
pub mod scanner;

/// User settings stored as TOML.
pub mod settings;

/// Platform-specific discovery of simulator data directories.
pub mod sources;

/// The upload client seam and the external-command client.
pub mod upload;

pub use activity::{ActivityFile, SourceRoot, SourceTag};
pub use fingerprint::Fingerprint;
pub use ledger::ProcessedFileLedger;
pub use orchestrator::{CancelHandle, OrchestratorOptions, RunError, UploadOrchestrator, UploadOutcome};
pub use report::{FileOutcome, RunReport};
pub use upload::{UploadClient, UploadResult};
