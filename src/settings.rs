use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ConfigManager;

/// User settings for scanning, uploading and backing up activity files
///
/// Stored as TOML in the config directory and read once per run; the
/// orchestrator treats the loaded value as an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Account identity shown in reports (authentication happens elsewhere)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Shared backup directory for archived files of both sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    /// Ledger location (default: processed.json in the config directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_path: Option<PathBuf>,

    /// Extension of activity files, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Skip files last modified more than N days ago
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,

    /// Descend into sub-directories of the source directories
    #[serde(default)]
    pub recursive: bool,

    #[serde(default)]
    pub sources: SourceDirs,

    #[serde(default)]
    pub upload: UploadSettings,

    #[serde(default)]
    pub markers: MarkerSettings,
}

/// Configured source directories
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDirs {
    /// MyWhoosh directories; auto-detected when empty
    #[serde(default)]
    pub simulator_a: Vec<PathBuf>,

    /// TrainingPeaks Virtual directories
    #[serde(default)]
    pub simulator_b: Vec<PathBuf>,

    /// Locations shared by both applications, classified by content only
    #[serde(default)]
    pub shared: Vec<PathBuf>,
}

/// Upload dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// External uploader program and its leading arguments; the file path is appended
    #[serde(default)]
    pub command: Vec<String>,

    /// Total upload attempts per file for retryable failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Number of concurrent upload workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Base delay between attempts, doubled after each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Byte markers that identify each producer inside a FIT file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSettings {
    #[serde(default = "default_simulator_a_markers")]
    pub simulator_a: Vec<String>,

    #[serde(default = "default_simulator_b_markers")]
    pub simulator_b: Vec<String>,
}

fn default_extension() -> String {
    "fit".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_concurrency() -> usize {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_simulator_a_markers() -> Vec<String> {
    vec!["MyWhoosh".to_string(), "Whoosh".to_string()]
}

fn default_simulator_b_markers() -> Vec<String> {
    vec![
        "TrainingPeaks".to_string(),
        "TPVirtual".to_string(),
        "indieVelo".to_string(),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            account: None,
            backup_dir: None,
            ledger_path: None,
            extension: default_extension(),
            max_age_days: None,
            recursive: false,
            sources: SourceDirs::default(),
            upload: UploadSettings::default(),
            markers: MarkerSettings::default(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        UploadSettings {
            command: Vec::new(),
            max_attempts: default_max_attempts(),
            concurrency: default_concurrency(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for MarkerSettings {
    fn default() -> Self {
        MarkerSettings {
            simulator_a: default_simulator_a_markers(),
            simulator_b: default_simulator_b_markers(),
        }
    }
}

impl Settings {
    /// Load settings from the config directory, falling back to defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&ConfigManager::settings_path()?)
    }

    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the config directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&ConfigManager::settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

        Ok(())
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.upload.max_attempts == 0 {
            bail!("upload.max_attempts must be at least 1");
        }
        if self.upload.concurrency == 0 {
            bail!("upload.concurrency must be at least 1");
        }
        if self.extension.trim().trim_start_matches('.').is_empty() {
            bail!("extension must not be empty");
        }
        Ok(())
    }

    /// Ledger location, defaulting to the config directory
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger_path {
            Some(path) => Ok(path.clone()),
            None => ConfigManager::default_ledger_path(),
        }
    }

    /// Backup directory, required before anything can be archived
    pub fn require_backup_dir(&self) -> Result<&Path> {
        self.backup_dir.as_deref().context(
            "No backup directory configured. Run 'fit-uploader init' or 'fit-uploader config --backup-dir <DIR>'",
        )
    }
}

/// Changes requested through `fit-uploader config`
#[derive(Debug, Default)]
pub struct SettingsUpdate {
    pub account: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub simulator_a: Option<String>,
    pub simulator_b: Option<String>,
    pub shared: Option<String>,
    pub upload_command: Option<String>,
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
    pub max_age_days: Option<u32>,
}

fn split_paths(list: &str) -> Result<Vec<PathBuf>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(crate::config::expand_tilde)
        .collect()
}

/// Apply an update to the stored settings
pub fn update_settings(update: SettingsUpdate) -> Result<()> {
    let mut settings = Settings::load()?;
    apply_update(&mut settings, update)?;
    settings.save()?;
    println!("{}", "Configuration saved successfully!".green().bold());
    Ok(())
}

pub(crate) fn apply_update(settings: &mut Settings, update: SettingsUpdate) -> Result<()> {
    if let Some(account) = update.account {
        println!("{}", format!("Set account to {account}").green());
        settings.account = Some(account);
    }

    if let Some(dir) = update.backup_dir {
        let dir = crate::config::expand_tilde(&dir.to_string_lossy())?;
        println!("{}", format!("Set backup directory to {}", dir.display()).green());
        settings.backup_dir = Some(dir);
    }

    if let Some(list) = update.simulator_a {
        settings.sources.simulator_a = split_paths(&list)?;
        println!(
            "{}",
            format!("Set MyWhoosh directories: {:?}", settings.sources.simulator_a).green()
        );
    }

    if let Some(list) = update.simulator_b {
        settings.sources.simulator_b = split_paths(&list)?;
        println!(
            "{}",
            format!(
                "Set TrainingPeaks Virtual directories: {:?}",
                settings.sources.simulator_b
            )
            .green()
        );
    }

    if let Some(list) = update.shared {
        settings.sources.shared = split_paths(&list)?;
        println!(
            "{}",
            format!("Set shared directories: {:?}", settings.sources.shared).green()
        );
    }

    if let Some(command) = update.upload_command {
        settings.upload.command = command.split_whitespace().map(str::to_string).collect();
        println!(
            "{}",
            format!("Set upload command: {}", settings.upload.command.join(" ")).green()
        );
    }

    if let Some(attempts) = update.max_attempts {
        settings.upload.max_attempts = attempts;
        println!("{}", format!("Set max attempts to {attempts}").green());
    }

    if let Some(workers) = update.concurrency {
        settings.upload.concurrency = workers;
        println!("{}", format!("Set concurrency to {workers}").green());
    }

    if let Some(days) = update.max_age_days {
        settings.max_age_days = Some(days);
        println!("{}", format!("Set max age to {days} days").green());
    }

    settings.validate()
}

fn format_dirs(dirs: &[PathBuf], empty: &str) -> String {
    if dirs.is_empty() {
        empty.to_string()
    } else {
        dirs.iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Show the current settings
pub fn show_settings() -> Result<()> {
    let settings = Settings::load()?;

    println!("{}", "Current Configuration:".bold());
    println!(
        "  {}: {}",
        "Account".cyan(),
        settings.account.as_deref().unwrap_or("Not set")
    );
    println!(
        "  {}: {}",
        "Backup directory".cyan(),
        settings
            .backup_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "Not set".yellow().to_string())
    );
    println!(
        "  {}: {}",
        "Ledger".cyan(),
        settings.ledger_path()?.display()
    );
    println!(
        "  {}: {}",
        "MyWhoosh directories".cyan(),
        format_dirs(&settings.sources.simulator_a, "Auto-detect")
    );
    println!(
        "  {}: {}",
        "TrainingPeaks Virtual directories".cyan(),
        format_dirs(&settings.sources.simulator_b, "Not set")
    );
    println!(
        "  {}: {}",
        "Shared directories".cyan(),
        format_dirs(&settings.sources.shared, "None")
    );
    println!(
        "  {}: .{} ({})",
        "Extension".cyan(),
        settings.extension,
        if settings.recursive {
            "recursive"
        } else {
            "top level only"
        }
    );
    println!(
        "  {}: {}",
        "Max age".cyan(),
        settings
            .max_age_days
            .map(|d| format!("{d} days"))
            .unwrap_or_else(|| "Not set".to_string())
    );
    println!(
        "  {}: {}",
        "Upload command".cyan(),
        if settings.upload.command.is_empty() {
            "Not set".yellow().to_string()
        } else {
            settings.upload.command.join(" ")
        }
    );
    println!(
        "  {}: {} attempts, {} workers, {} ms backoff",
        "Upload policy".cyan(),
        settings.upload.max_attempts,
        settings.upload.concurrency,
        settings.upload.retry_backoff_ms
    );

    Ok(())
}
