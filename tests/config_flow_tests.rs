//! Settings, ledger and report files under a temporary config directory.
#![cfg(target_os = "linux")]

use serial_test::serial;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use fit_uploader::config::ConfigManager;
use fit_uploader::report::{load_latest_report, save_run_report};
use fit_uploader::settings::{update_settings, Settings, SettingsUpdate};
use fit_uploader::upload::{UploadClient, UploadResult};
use fit_uploader::{FileOutcome, ProcessedFileLedger, UploadOrchestrator};

/// Points the config directory at a temp dir for the lifetime of the guard
struct ConfigHome {
    temp: TempDir,
    previous: Option<String>,
}

impl ConfigHome {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let previous = std::env::var("XDG_CONFIG_HOME").ok();
        std::env::set_var("XDG_CONFIG_HOME", temp.path());
        Self { temp, previous }
    }

    fn path(&self) -> &Path {
        self.temp.path()
    }
}

impl Drop for ConfigHome {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}

struct AlwaysSucceeds;

impl UploadClient for AlwaysSucceeds {
    fn upload(&self, _path: &Path) -> UploadResult {
        UploadResult::Success
    }
}

#[test]
#[serial]
fn test_update_settings_persists_to_config_dir() {
    let home = ConfigHome::new();
    let backup = home.path().join("backup");

    update_settings(SettingsUpdate {
        backup_dir: Some(backup.clone()),
        simulator_b: Some(format!("{}, {}", home.path().join("tpv").display(), "/mnt/tpv")),
        upload_command: Some("garmin-upload --token-dir /t".to_string()),
        max_attempts: Some(5),
        ..Default::default()
    })
    .unwrap();

    let path = ConfigManager::settings_path().unwrap();
    assert!(path.starts_with(home.path()));
    assert!(path.exists());

    let settings = Settings::load().unwrap();
    assert_eq!(settings.backup_dir, Some(backup));
    assert_eq!(
        settings.sources.simulator_b,
        vec![home.path().join("tpv"), PathBuf::from("/mnt/tpv")]
    );
    assert_eq!(settings.upload.command, vec!["garmin-upload", "--token-dir", "/t"]);
    assert_eq!(settings.upload.max_attempts, 5);
    assert_eq!(settings.upload.concurrency, 2);
}

#[test]
#[serial]
fn test_invalid_update_is_not_saved() {
    let home = ConfigHome::new();

    let result = update_settings(SettingsUpdate {
        concurrency: Some(0),
        ..Default::default()
    });

    assert!(result.is_err());
    assert!(!home.path().join("fit-uploader/config.toml").exists());
}

#[test]
#[serial]
fn test_run_from_settings_and_saved_report() {
    let home = ConfigHome::new();
    let mywhoosh = home.path().join("mw");
    let tpv = home.path().join("tpv");
    let backup = home.path().join("backup");
    fs::create_dir_all(&mywhoosh).unwrap();
    fs::create_dir_all(&tpv).unwrap();
    fs::write(mywhoosh.join("MyNewActivity-1.fit"), b"mw").unwrap();
    fs::write(tpv.join("ride.fit"), b"tpv").unwrap();

    let mut settings = Settings::default();
    settings.account = Some("rider@example.com".to_string());
    settings.backup_dir = Some(backup.clone());
    settings.sources.simulator_a = vec![mywhoosh];
    settings.sources.simulator_b = vec![tpv];
    settings.upload.retry_backoff_ms = 0;
    settings.save().unwrap();

    let settings = Settings::load().unwrap();
    let orchestrator = UploadOrchestrator::from_settings(&settings, Box::new(AlwaysSucceeds)).unwrap();
    let mut ledger = ProcessedFileLedger::load(settings.ledger_path().unwrap()).unwrap();
    let report = orchestrator.run(&mut ledger).unwrap();

    assert_eq!(report.account.as_deref(), Some("rider@example.com"));
    assert!(backup.join("MW_MyNewActivity-1.fit").exists());
    assert!(backup.join("TPV_ride.fit").exists());
    assert!(ConfigManager::default_ledger_path().unwrap().exists());

    save_run_report(&report).unwrap();
    let latest = load_latest_report().unwrap().unwrap();
    assert_eq!(latest.run_id, report.run_id);
    assert!(latest
        .entries
        .iter()
        .all(|e| matches!(e.outcome, FileOutcome::Archived { .. })));
}

#[test]
#[serial]
fn test_missing_backup_dir_is_an_error() {
    let _home = ConfigHome::new();
    let settings = Settings::default();
    let result = UploadOrchestrator::from_settings(&settings, Box::new(AlwaysSucceeds));
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_no_report_before_first_run() {
    let _home = ConfigHome::new();
    assert!(load_latest_report().unwrap().is_none());
}
