use rstest::rstest;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use fit_uploader::archive::BackupArchiver;
use fit_uploader::error::LedgerError;
use fit_uploader::scanner::DirectoryScanner;
use fit_uploader::{
    CancelHandle, FileOutcome, OrchestratorOptions, ProcessedFileLedger, SourceRoot, SourceTag,
    UploadClient, UploadOrchestrator, UploadResult,
};

/// Upload client double: replays scripted results, then succeeds
#[derive(Clone, Default)]
struct ScriptedClient {
    script: Arc<Mutex<VecDeque<UploadResult>>>,
    calls: Arc<AtomicUsize>,
    uploaded: Arc<Mutex<Vec<PathBuf>>>,
    cancel_on_first: Arc<Mutex<Option<CancelHandle>>>,
}

impl ScriptedClient {
    fn with_script(results: Vec<UploadResult>) -> Self {
        let client = Self::default();
        *client.script.lock().unwrap() = results.into();
        client
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl UploadClient for ScriptedClient {
    fn upload(&self, path: &Path) -> UploadResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.cancel_on_first.lock().unwrap().take() {
            handle.cancel();
        }
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(UploadResult::Success);
        if result == UploadResult::Success {
            self.uploaded.lock().unwrap().push(path.to_path_buf());
        }
        result
    }
}

/// Scratch layout with one directory per source plus a shared one
struct Fixture {
    _temp: TempDir,
    mywhoosh: PathBuf,
    tpv: PathBuf,
    shared: PathBuf,
    backup: PathBuf,
    ledger_path: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let fixture = Self {
            mywhoosh: root.join("MyWhoosh/Content/Data"),
            tpv: root.join("TPVirtual/0123/FITFiles"),
            shared: root.join("Downloads"),
            backup: root.join("FitBackup"),
            ledger_path: root.join("config/processed.json"),
            _temp: temp,
        };
        for dir in [&fixture.mywhoosh, &fixture.tpv, &fixture.shared] {
            fs::create_dir_all(dir).unwrap();
        }
        fixture
    }

    fn roots(&self) -> Vec<SourceRoot> {
        vec![
            SourceRoot::new(&self.mywhoosh, SourceTag::SimulatorA),
            SourceRoot::new(&self.tpv, SourceTag::SimulatorB),
            SourceRoot::shared(&self.shared),
        ]
    }

    fn orchestrator(&self, client: &ScriptedClient, max_attempts: u32, concurrency: usize) -> UploadOrchestrator {
        UploadOrchestrator::new(
            self.roots(),
            BackupArchiver::new(&self.backup),
            Box::new(client.clone()),
        )
        .with_options(OrchestratorOptions {
            max_attempts,
            concurrency,
            retry_backoff: Duration::ZERO,
        })
    }

    fn ledger(&self) -> ProcessedFileLedger {
        ProcessedFileLedger::load(&self.ledger_path).unwrap()
    }
}

fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

/// Minimal FIT byte stream: 14-byte header, payload as data section, CRC
fn fit_bytes(payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![14, 0x20];
    bytes.extend_from_slice(&2132u16.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(b".FIT");
    bytes.extend_from_slice(&[0, 0]);
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

#[test]
fn test_two_sources_end_to_end() {
    let fx = Fixture::new();
    let mw = write(&fx.mywhoosh, "MyNewActivity-3.fit", b"mywhoosh ride");
    let tpv = write(&fx.tpv, "2025-03-01-10-00-00.fit", b"tpv ride");
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 2).run(&mut ledger).unwrap();

    assert_eq!(report.summary().archived, 2);
    assert!(!report.has_failures());
    assert_eq!(client.calls(), 2);

    let mw_backup = fx.backup.join("MW_MyNewActivity-3.fit");
    let tpv_backup = fx.backup.join("TPV_2025-03-01-10-00-00.fit");
    assert_eq!(fs::read(&mw_backup).unwrap(), b"mywhoosh ride");
    assert_eq!(fs::read(&tpv_backup).unwrap(), b"tpv ride");
    assert!(!mw.exists());
    assert!(!tpv.exists());

    // The ledger on disk holds both entries with their backup paths
    let reloaded = fx.ledger();
    assert_eq!(reloaded.len(), 2);
    let backups: Vec<_> = reloaded
        .entries()
        .iter()
        .map(|e| e.backup_path.clone().unwrap())
        .collect();
    assert!(backups.contains(&mw_backup));
    assert!(backups.contains(&tpv_backup));
}

#[test]
fn test_second_run_skips_everything() {
    let fx = Fixture::new();
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"first");
    write(&fx.tpv, "ride.fit", b"second");
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();
    fx.orchestrator(&client, 3, 2).run(&mut ledger).unwrap();
    assert_eq!(client.calls(), 2);

    // The simulators write the same activities again
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"first");
    write(&fx.tpv, "ride-copy.fit", b"second");

    let second_client = ScriptedClient::default();
    let mut ledger = fx.ledger();
    let report = fx.orchestrator(&second_client, 3, 2).run(&mut ledger).unwrap();

    assert_eq!(report.entries.len(), 2);
    assert!(report
        .entries
        .iter()
        .all(|e| e.outcome == FileOutcome::SkippedDuplicate));
    assert_eq!(second_client.calls(), 0);
    assert_eq!(fx.ledger().len(), 2);
}

#[rstest]
#[case::within_limit(3, true)]
#[case::limit_exhausted(2, false)]
fn test_retry_limit(#[case] max_attempts: u32, #[case] archived: bool) {
    let fx = Fixture::new();
    let file = write(&fx.mywhoosh, "MyNewActivity-9.fit", b"flaky network");
    let client = ScriptedClient::with_script(vec![
        UploadResult::RetryableFailure("timeout".to_string()),
        UploadResult::RetryableFailure("timeout".to_string()),
    ]);
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, max_attempts, 1).run(&mut ledger).unwrap();
    let outcome = &report.entries[0].outcome;

    if archived {
        assert_eq!(client.calls(), 3);
        assert!(matches!(outcome, FileOutcome::Archived { .. }));
        assert_eq!(ledger.len(), 1);
        assert!(!file.exists());
    } else {
        assert_eq!(client.calls(), 2);
        assert_eq!(
            outcome,
            &FileOutcome::UploadFailed {
                reason: "timeout".to_string(),
                retryable: true,
                attempts: 2,
            }
        );
        assert!(ledger.is_empty());
        assert!(fx.ledger().is_empty());
        assert!(file.exists());
    }
}

#[test]
fn test_fatal_failure_is_not_retried() {
    let fx = Fixture::new();
    let file = write(&fx.tpv, "ride.fit", b"rejected");
    let client = ScriptedClient::with_script(vec![UploadResult::FatalFailure(
        "invalid file".to_string(),
    )]);
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap();

    assert_eq!(client.calls(), 1);
    assert_eq!(report.entries[0].outcome.label(), "UploadFailed:invalid file");
    assert!(report.has_failures());
    assert!(ledger.is_empty());
    assert!(file.exists());
}

#[test]
fn test_failures_do_not_stop_the_batch() {
    let fx = Fixture::new();
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"one");
    write(&fx.mywhoosh, "MyNewActivity-2.fit", b"two");
    write(&fx.mywhoosh, "MyNewActivity-3.fit", b"three");
    let client = ScriptedClient::with_script(vec![UploadResult::FatalFailure(
        "session expired".to_string(),
    )]);
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap();
    let summary = report.summary();

    assert_eq!(client.calls(), 3);
    assert_eq!(summary.upload_failed, 1);
    assert_eq!(summary.archived, 2);
    assert_eq!(ledger.len(), 2);
}

#[test]
fn test_archive_collision_is_reported_and_not_recorded() {
    let fx = Fixture::new();
    fs::create_dir_all(&fx.backup).unwrap();
    fs::write(fx.backup.join("MW_MyNewActivity-1.fit"), b"older backup").unwrap();
    let file = write(&fx.mywhoosh, "MyNewActivity-1.fit", b"new ride");
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap();

    assert_eq!(client.calls(), 1);
    assert!(matches!(report.entries[0].outcome, FileOutcome::ArchiveFailed { .. }));
    assert!(report.entries[0].outcome.label().starts_with("ArchiveFailed:"));
    assert_eq!(report.summary().archive_failed, 1);
    assert!(ledger.is_empty());
    assert!(file.exists());
    assert_eq!(
        fs::read(fx.backup.join("MW_MyNewActivity-1.fit")).unwrap(),
        b"older backup"
    );
}

#[test]
fn test_directory_wins_over_content() {
    let fx = Fixture::new();
    // TrainingPeaks Virtual directory, MyWhoosh marker inside
    write(&fx.tpv, "ride.fit", &fit_bytes(b"product=MyWhoosh"));
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap();

    assert_eq!(report.entries[0].source, SourceTag::SimulatorB);
    assert!(fx.backup.join("TPV_ride.fit").exists());
    assert!(!fx.backup.join("MW_ride.fit").exists());
}

#[test]
fn test_shared_location_uses_content() {
    let fx = Fixture::new();
    write(&fx.shared, "a.fit", &fit_bytes(b"app=MyWhoosh"));
    write(&fx.shared, "b.fit", &fit_bytes(b"app=TPVirtual"));
    let zwift = write(&fx.shared, "c.fit", &fit_bytes(b"app=Zwift"));
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 2).run(&mut ledger).unwrap();

    assert_eq!(client.calls(), 2);
    assert!(fx.backup.join("MW_a.fit").exists());
    assert!(fx.backup.join("TPV_b.fit").exists());
    assert_eq!(report.summary().unknown, 1);
    assert!(zwift.exists());
    assert!(!client.uploaded.lock().unwrap().contains(&zwift));
}

#[test]
fn test_identical_files_uploaded_once() {
    let fx = Fixture::new();
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"same bytes");
    let copy = write(&fx.tpv, "copy.fit", b"same bytes");
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 2).run(&mut ledger).unwrap();

    assert_eq!(client.calls(), 1);
    assert_eq!(ledger.len(), 1);
    assert_eq!(report.entries[0].fingerprint, report.entries[1].fingerprint);
    assert!(matches!(report.entries[0].outcome, FileOutcome::Archived { .. }));
    assert_eq!(report.entries[1].outcome, FileOutcome::SkippedDuplicate);
    assert!(copy.exists());
}

#[test]
fn test_recorded_exactly_once_across_restart() {
    let fx = Fixture::new();
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"ride");
    let client = ScriptedClient::default();

    {
        let mut ledger = fx.ledger();
        fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap();
    }

    // New process: fresh ledger load, same content shows up again
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"ride");
    let mut ledger = fx.ledger();
    let report = fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap();

    assert_eq!(client.calls(), 1);
    assert_eq!(report.entries[0].outcome, FileOutcome::SkippedDuplicate);
    assert_eq!(fx.ledger().len(), 1);
}

#[test]
fn test_cancel_before_run_reports_cancelled() {
    let fx = Fixture::new();
    let a = write(&fx.mywhoosh, "MyNewActivity-1.fit", b"one");
    let b = write(&fx.tpv, "ride.fit", b"two");
    let client = ScriptedClient::default();
    let orchestrator = fx.orchestrator(&client, 3, 2);
    orchestrator.cancel_handle().cancel();

    let mut ledger = fx.ledger();
    let report = orchestrator.run(&mut ledger).unwrap();

    assert_eq!(client.calls(), 0);
    assert_eq!(report.summary().cancelled, 2);
    assert!(ledger.is_empty());
    assert!(a.exists() && b.exists());
}

#[test]
fn test_cancel_finishes_in_flight_upload() {
    let fx = Fixture::new();
    for i in 1..=3 {
        write(&fx.mywhoosh, &format!("MyNewActivity-{i}.fit"), format!("ride {i}").as_bytes());
    }
    let client = ScriptedClient::default();
    let orchestrator = fx.orchestrator(&client, 3, 1);
    *client.cancel_on_first.lock().unwrap() = Some(orchestrator.cancel_handle());

    let mut ledger = fx.ledger();
    let report = orchestrator.run(&mut ledger).unwrap();
    let summary = report.summary();

    assert_eq!(client.calls(), 1);
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.cancelled, 2);
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_dry_run_changes_nothing() {
    let fx = Fixture::new();
    let file = write(&fx.mywhoosh, "MyNewActivity-1.fit", b"ride");
    write(&fx.shared, "other.fit", &fit_bytes(b"unknown app"));
    let client = ScriptedClient::default();
    let ledger = fx.ledger();

    let report = fx.orchestrator(&client, 3, 1).plan(&ledger);

    assert!(report.dry_run);
    assert_eq!(report.summary().pending, 1);
    assert_eq!(report.summary().unknown, 1);
    assert_eq!(client.calls(), 0);
    assert!(file.exists());
    assert!(!fx.ledger_path.exists());
}

#[test]
fn test_report_keeps_discovery_order() {
    let fx = Fixture::new();
    for i in 0..12 {
        write(&fx.mywhoosh, &format!("MyNewActivity-{i}.fit"), format!("ride {i}").as_bytes());
    }
    let roots = fx.roots();
    let expected: Vec<_> = DirectoryScanner::default()
        .scan(&roots)
        .map(|f| f.path().to_path_buf())
        .collect();

    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();
    let report = fx.orchestrator(&client, 3, 4).run(&mut ledger).unwrap();

    let reported: Vec<_> = report.entries.iter().map(|e| e.path.clone()).collect();
    assert_eq!(reported, expected);
    assert_eq!(report.summary().archived, 12);
}

#[test]
fn test_unwritable_ledger_stops_the_run() {
    let fx = Fixture::new();
    for n in 1..=3 {
        write(&fx.mywhoosh, &format!("MyNewActivity-{n}.fit"), format!("ride {n}").as_bytes());
    }
    // A directory where the ledger file should go makes every flush fail
    fs::create_dir_all(fx.ledger_path.join("occupied")).unwrap();
    let client = ScriptedClient::default();
    let mut ledger = ProcessedFileLedger::new(&fx.ledger_path);

    let err = fx.orchestrator(&client, 3, 1).run(&mut ledger).unwrap_err();

    assert!(matches!(err.source, LedgerError::PersistFailed { .. }));
    assert!(ledger.is_empty());
    assert_eq!(client.calls(), 1);

    let report = err.report;
    assert_eq!(report.entries.len(), 3);
    assert!(report.has_failures());

    let unrecorded: Vec<_> = report
        .entries
        .iter()
        .filter(|e| matches!(e.outcome, FileOutcome::RecordFailed { .. }))
        .collect();
    assert_eq!(unrecorded.len(), 1);
    let FileOutcome::RecordFailed { backup_path, reason } = &unrecorded[0].outcome else {
        unreachable!()
    };
    assert!(backup_path.starts_with(&fx.backup));
    assert!(backup_path.exists());
    assert!(!unrecorded[0].path.exists());
    assert!(reason.contains("could not be written"));

    let cancelled: Vec<_> = report
        .entries
        .iter()
        .filter(|e| e.outcome == FileOutcome::Cancelled)
        .collect();
    assert_eq!(cancelled.len(), 2);
    assert!(cancelled.iter().all(|e| e.path.exists()));
}

#[test]
fn test_same_name_in_two_mywhoosh_dirs_never_overwrites() {
    let fx = Fixture::new();
    let second = fx.shared.join("MyWhoosh-old/Data");
    fs::create_dir_all(&second).unwrap();
    write(&fx.mywhoosh, "MyNewActivity-1.fit", b"first install");
    write(&second, "MyNewActivity-1.fit", b"second install");
    let client = ScriptedClient::default();
    let mut ledger = fx.ledger();

    let orchestrator = UploadOrchestrator::new(
        vec![
            SourceRoot::new(&fx.mywhoosh, SourceTag::SimulatorA),
            SourceRoot::new(&second, SourceTag::SimulatorA),
        ],
        BackupArchiver::new(&fx.backup),
        Box::new(client.clone()),
    )
    .with_options(OrchestratorOptions {
        max_attempts: 1,
        concurrency: 2,
        retry_backoff: Duration::ZERO,
    });
    let report = orchestrator.run(&mut ledger).unwrap();

    let summary = report.summary();
    assert_eq!(summary.archived, 1);
    assert_eq!(summary.archive_failed, 1);
    assert_eq!(ledger.len(), 1);

    let archived = report
        .entries
        .iter()
        .find(|e| matches!(e.outcome, FileOutcome::Archived { .. }))
        .unwrap();
    let kept = report
        .entries
        .iter()
        .find(|e| matches!(e.outcome, FileOutcome::ArchiveFailed { .. }))
        .unwrap();
    assert!(kept.path.exists());
    assert_ne!(
        fs::read(fx.backup.join("MW_MyNewActivity-1.fit")).unwrap(),
        fs::read(&kept.path).unwrap()
    );
    assert!(!archived.path.exists());
}
