//! Per-run coordination of scanning, classification, upload and backup.
//!
//! A run has two phases. Triage happens on the calling thread: every
//! discovered file is fingerprinted, classified and checked against the
//! ledger, in discovery order. The files left over are then handed to a
//! fixed pool of upload workers over a channel. A worker uploads one file
//! (retrying temporary failures), archives it and records it in the ledger
//! before taking the next one.
//!
//! The ledger is recorded only after the archive step succeeded, so a crash
//! between upload and record means the file is uploaded again next time,
//! never lost.

pub mod state;

pub use state::FileState;

use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use crate::activity::{ActivityFile, SourceRoot, SourceTag};
use crate::archive::BackupArchiver;
use crate::classifier::{DecodingInspector, SourceClassifier};
use crate::error::LedgerError;
use crate::fingerprint::Fingerprint;
use crate::ledger::ProcessedFileLedger;
use crate::report::{FileOutcome, ReportEntry, RunReport};
use crate::scanner::DirectoryScanner;
use crate::settings::{Settings, UploadSettings};
use crate::sources;
use crate::upload::{UploadClient, UploadResult};
use state::Progress;

/// Upper bound for the delay between two upload attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Result of the upload stage for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    SkippedDuplicate,
    RetryableFailure(String),
    FatalFailure(String),
}

impl UploadOutcome {
    /// Report outcome when the stage ended without an upload, `None` after an upload
    fn unarchived(self, attempts: u32) -> Option<FileOutcome> {
        match self {
            UploadOutcome::Uploaded => None,
            UploadOutcome::SkippedDuplicate => Some(FileOutcome::SkippedDuplicate),
            UploadOutcome::RetryableFailure(reason) => Some(FileOutcome::UploadFailed {
                reason,
                retryable: true,
                attempts,
            }),
            UploadOutcome::FatalFailure(reason) => Some(FileOutcome::UploadFailed {
                reason,
                retryable: false,
                attempts,
            }),
        }
    }
}

/// A run stopped early because the ledger could not be written
///
/// The report still covers every discovered file. The file whose record
/// failed is reported as [`FileOutcome::RecordFailed`].
#[derive(Error, Debug)]
#[error("Upload run stopped: {source}")]
pub struct RunError {
    pub report: Box<RunReport>,
    #[source]
    pub source: LedgerError,
}

/// Retry and concurrency limits for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    /// Total attempts per file, first one included
    pub max_attempts: u32,
    pub concurrency: usize,
    /// Delay after the first failed attempt, doubled after each further one
    pub retry_backoff: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_settings(&UploadSettings::default())
    }
}

impl OrchestratorOptions {
    pub fn from_settings(upload: &UploadSettings) -> Self {
        Self {
            max_attempts: upload.max_attempts,
            concurrency: upload.concurrency,
            retry_backoff: Duration::from_millis(upload.retry_backoff_ms),
        }
    }

    /// Delay before the attempt following failed attempt number `attempt`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Asks a running orchestrator to stop taking new work
///
/// Uploads already in flight are finished and archived; files not yet
/// started are reported as cancelled and stay eligible for the next run.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A file that passed triage and waits for a worker
struct Candidate {
    index: usize,
    file: ActivityFile,
    fingerprint: Fingerprint,
    source: SourceTag,
}

/// Runs scanning, classification, dedup, upload, backup and ledger updates
pub struct UploadOrchestrator {
    roots: Vec<SourceRoot>,
    scanner: DirectoryScanner,
    classifier: SourceClassifier,
    archiver: BackupArchiver,
    client: Box<dyn UploadClient>,
    options: OrchestratorOptions,
    account: Option<String>,
    cancel: CancelHandle,
}

impl UploadOrchestrator {
    /// Orchestrator with default scanning, classification and retry settings
    pub fn new(roots: Vec<SourceRoot>, archiver: BackupArchiver, client: Box<dyn UploadClient>) -> Self {
        let mut classifier = SourceClassifier::new(Box::new(DecodingInspector::default()));
        for root in &roots {
            if let Some(tag) = root.hint {
                classifier = classifier.with_canonical_dir(root.path.clone(), tag);
            }
        }

        Self {
            roots,
            scanner: DirectoryScanner::default(),
            classifier,
            archiver,
            client,
            options: OrchestratorOptions::default(),
            account: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Orchestrator for the configured source and backup directories
    pub fn from_settings(settings: &Settings, client: Box<dyn UploadClient>) -> Result<Self> {
        let roots = sources::resolve_roots(settings)?;
        let archiver = BackupArchiver::new(settings.require_backup_dir()?);
        let classifier = SourceClassifier::from_settings(settings, &roots);

        Ok(Self::new(roots, archiver, client)
            .with_scanner(DirectoryScanner::from_settings(settings))
            .with_classifier(classifier)
            .with_options(OrchestratorOptions::from_settings(&settings.upload))
            .with_account(settings.account.clone()))
    }

    pub fn with_scanner(mut self, scanner: DirectoryScanner) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn with_classifier(mut self, classifier: SourceClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_options(mut self, options: OrchestratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_account(mut self, account: Option<String>) -> Self {
        self.account = account;
        self
    }

    pub fn roots(&self) -> &[SourceRoot] {
        &self.roots
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// What a run would do, without uploading or moving anything
    pub fn plan(&self, ledger: &ProcessedFileLedger) -> RunReport {
        let mut report = RunReport::begin(self.account.clone());
        report.dry_run = true;

        let (mut settled, queue) = self.triage(ledger);
        settled.extend(queue.into_iter().map(|c| {
            let entry = entry_for(&c.file, c.source, Some(c.fingerprint), FileOutcome::Pending);
            (c.index, entry)
        }));

        report.finish(in_discovery_order(settled))
    }

    /// Process every discovered file once
    ///
    /// Per-file failures end up in the report. Only a ledger that cannot be
    /// written fails the run: dispatch stops, in-flight uploads finish, and
    /// the error is returned together with the report so far.
    pub fn run(&self, ledger: &mut ProcessedFileLedger) -> Result<RunReport, RunError> {
        let report = RunReport::begin(self.account.clone());

        let (mut settled, queue) = self.triage(ledger);
        log::info!(
            "{} file(s) to upload, {} settled without upload",
            queue.len(),
            settled.len()
        );

        let mut failure = None;
        if !queue.is_empty() {
            let (dispatched, ledger_failure) = self.dispatch(queue, ledger);
            settled.extend(dispatched);
            failure = ledger_failure;
        }

        let report = report.finish(in_discovery_order(settled));
        match failure {
            Some(source) => Err(RunError {
                report: Box::new(report),
                source,
            }),
            None => Ok(report),
        }
    }

    /// Fingerprint, classify and dedup all discovered files
    fn triage(&self, ledger: &ProcessedFileLedger) -> (Vec<(usize, ReportEntry)>, Vec<Candidate>) {
        let mut settled = Vec::new();
        let mut queue = Vec::new();
        let mut batch = HashSet::new();

        for (index, file) in self.scanner.scan(&self.roots).enumerate() {
            let mut progress = Progress::new(file.path());

            let fingerprint = match file.fingerprint() {
                Ok(fp) => fp.clone(),
                Err(e) => {
                    log::warn!("Cannot read {}: {}", file.path().display(), e);
                    let source = self
                        .classifier
                        .directory_signal(&file)
                        .unwrap_or(SourceTag::Unknown);
                    let outcome = FileOutcome::UploadFailed {
                        reason: format!("unreadable: {e}"),
                        retryable: false,
                        attempts: 0,
                    };
                    settled.push((index, entry_for(&file, source, None, outcome)));
                    continue;
                }
            };

            let source = self.classifier.classify(&file);
            progress.advance(FileState::Classified);

            if !source.is_known() {
                settled.push((
                    index,
                    entry_for(&file, source, Some(fingerprint), FileOutcome::UnknownSource),
                ));
                continue;
            }

            if ledger.contains(&fingerprint) || !batch.insert(fingerprint.clone()) {
                progress.advance(FileState::DuplicateSkip);
                log::info!(
                    "Skipping {}: already processed ({})",
                    file.path().display(),
                    fingerprint.short()
                );
                settled.push((
                    index,
                    entry_for(&file, source, Some(fingerprint), FileOutcome::SkippedDuplicate),
                ));
                continue;
            }

            progress.advance(FileState::Queued);
            queue.push(Candidate {
                index,
                file,
                fingerprint,
                source,
            });
        }

        (settled, queue)
    }

    /// Feed `queue` to the worker pool and collect one entry per file, plus
    /// the ledger error that halted the pool, if any
    fn dispatch(
        &self,
        queue: Vec<Candidate>,
        ledger: &mut ProcessedFileLedger,
    ) -> (Vec<(usize, ReportEntry)>, Option<LedgerError>) {
        let total = queue.len();
        let workers = self.options.concurrency.clamp(1, total.max(1));

        let ledger = Mutex::new(ledger);
        let ledger_failure: Mutex<Option<LedgerError>> = Mutex::new(None);
        let halted = AtomicBool::new(false);

        let (job_tx, job_rx) = mpsc::channel::<Candidate>();
        for candidate in queue {
            // The receiver lives until the end of this function
            let _ = job_tx.send(candidate);
        }
        drop(job_tx);
        let job_rx = Mutex::new(job_rx);

        let (result_tx, result_rx) = mpsc::channel::<(usize, ReportEntry)>();
        let mut results = Vec::with_capacity(total);

        thread::scope(|scope| {
            for worker in 0..workers {
                let result_tx = result_tx.clone();
                let (job_rx, ledger, ledger_failure, halted) =
                    (&job_rx, &ledger, &ledger_failure, &halted);

                scope.spawn(move || {
                    log::debug!("Upload worker {worker} started");
                    loop {
                        let next = match job_rx.lock() {
                            Ok(rx) => rx.recv(),
                            Err(_) => break,
                        };
                        let Ok(candidate) = next else { break };
                        let index = candidate.index;

                        let entry = if self.cancel.is_cancelled() || halted.load(Ordering::SeqCst) {
                            entry_for(
                                &candidate.file,
                                candidate.source,
                                Some(candidate.fingerprint),
                                FileOutcome::Cancelled,
                            )
                        } else {
                            let (entry, failure) = self.process(candidate, ledger);
                            if let Some(e) = failure {
                                log::error!("Stopping uploads: {e}");
                                halted.store(true, Ordering::SeqCst);
                                ledger_failure
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .get_or_insert(e);
                            }
                            entry
                        };

                        if result_tx.send((index, entry)).is_err() {
                            break;
                        }
                    }
                    log::debug!("Upload worker {worker} finished");
                });
            }
            drop(result_tx);

            for (index, entry) in result_rx.iter() {
                log::info!(
                    "[{}/{}] {}: {}",
                    results.len() + 1,
                    total,
                    entry.path.display(),
                    entry.outcome.label()
                );
                results.push((index, entry));
            }
        });

        let failure = ledger_failure
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        (results, failure)
    }

    /// Upload, archive and record one file
    fn process(
        &self,
        candidate: Candidate,
        ledger: &Mutex<&mut ProcessedFileLedger>,
    ) -> (ReportEntry, Option<LedgerError>) {
        let Candidate {
            file,
            fingerprint,
            source,
            ..
        } = candidate;
        let mut progress = Progress::resume(file.path(), FileState::Queued);
        progress.advance(FileState::Uploading);

        let (upload, attempts) = self.upload_with_retry(file.path());
        if let Some(outcome) = upload.unarchived(attempts) {
            progress.advance(FileState::UploadFailed);
            log::warn!(
                "Upload of {} failed after {} attempt(s): {}",
                file.path().display(),
                attempts,
                outcome.label()
            );
            return (entry_for(&file, source, Some(fingerprint), outcome), None);
        }
        progress.advance(FileState::UploadSucceeded);

        let backup_path = match self.archiver.archive(&file, source) {
            Ok(path) => path,
            Err(e) => {
                progress.advance(FileState::ArchiveFailed);
                log::warn!(
                    "{} was uploaded but not backed up: {}",
                    file.path().display(),
                    e
                );
                let outcome = FileOutcome::ArchiveFailed {
                    reason: e.to_string(),
                };
                return (entry_for(&file, source, Some(fingerprint), outcome), None);
            }
        };
        progress.advance(FileState::Archived);

        let committed = ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .commit(fingerprint.clone(), source, &backup_path);

        match committed {
            Ok(()) => {
                let outcome = FileOutcome::Archived { backup_path };
                (entry_for(&file, source, Some(fingerprint), outcome), None)
            }
            Err(e) => {
                log::error!(
                    "{} was uploaded and backed up as {} but could not be recorded: {}",
                    file.path().display(),
                    backup_path.display(),
                    e
                );
                let outcome = FileOutcome::RecordFailed {
                    backup_path,
                    reason: e.to_string(),
                };
                (entry_for(&file, source, Some(fingerprint), outcome), Some(e))
            }
        }
    }

    /// Upload with retries; returns the outcome and the number of attempts made
    fn upload_with_retry(&self, path: &Path) -> (UploadOutcome, u32) {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            log::debug!(
                "Uploading {} (attempt {}/{})",
                path.display(),
                attempt,
                max_attempts
            );

            match self.client.upload(path) {
                UploadResult::Success => return (UploadOutcome::Uploaded, attempt),
                UploadResult::FatalFailure(reason) => {
                    return (UploadOutcome::FatalFailure(reason), attempt)
                }
                UploadResult::RetryableFailure(reason) => {
                    if attempt >= max_attempts || self.cancel.is_cancelled() {
                        return (UploadOutcome::RetryableFailure(reason), attempt);
                    }

                    let delay = self.options.backoff_for(attempt);
                    log::warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        max_attempts,
                        path.display(),
                        reason,
                        delay
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }
}

fn entry_for(
    file: &ActivityFile,
    source: SourceTag,
    fingerprint: Option<Fingerprint>,
    outcome: FileOutcome,
) -> ReportEntry {
    ReportEntry {
        path: file.path().to_path_buf(),
        source,
        fingerprint,
        outcome,
    }
}

fn in_discovery_order(mut entries: Vec<(usize, ReportEntry)>) -> Vec<ReportEntry> {
    entries.sort_by_key(|(index, _)| *index);
    entries.into_iter().map(|(_, entry)| entry).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let options = OrchestratorOptions {
            max_attempts: 5,
            concurrency: 1,
            retry_backoff: Duration::from_millis(500),
        };
        assert_eq!(options.backoff_for(1), Duration::from_millis(500));
        assert_eq!(options.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(options.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(options.backoff_for(40), MAX_BACKOFF);
    }

    #[test]
    fn test_options_from_settings() {
        let options = OrchestratorOptions::default();
        assert_eq!(options.max_attempts, 3);
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.retry_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_cancel_handle_is_shared() {
        let handle = CancelHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_upload_outcome_to_report() {
        assert_eq!(UploadOutcome::Uploaded.unarchived(1), None);
        assert_eq!(
            UploadOutcome::RetryableFailure("timeout".to_string()).unarchived(3),
            Some(FileOutcome::UploadFailed {
                reason: "timeout".to_string(),
                retryable: true,
                attempts: 3
            })
        );
        assert_eq!(
            UploadOutcome::SkippedDuplicate.unarchived(0),
            Some(FileOutcome::SkippedDuplicate)
        );
    }
}
