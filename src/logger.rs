use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;

use crate::config::ConfigManager;
use crate::report::RunReport;

/// Size at which the log file is rotated to `fit-uploader.log.old`
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize the logging system
///
/// Sets up logging to the console and records the initialization in a log file
/// inside the config directory.
///
/// **Console logging** is controlled via the `RUST_LOG` environment variable
/// (`error`, `warn`, `info` (default), `debug`, `trace`).
///
/// **File logging** is stored at:
/// - Linux: ~/.config/fit-uploader/fit-uploader.log or $XDG_CONFIG_HOME/fit-uploader/fit-uploader.log
/// - macOS: ~/Library/Application Support/fit-uploader/fit-uploader.log
/// - Windows: %APPDATA%\fit-uploader\fit-uploader.log
///
/// ```bash
/// # Follow every state transition of an upload run
/// RUST_LOG=debug fit-uploader upload
/// ```
pub fn init_logger() -> Result<()> {
    ConfigManager::ensure_config_dir()?;

    let default_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{:5}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter_level(default_level)
        .target(env_logger::Target::Stdout)
        .try_init()
        .ok(); // already initialized (tests, repeated calls)

    log_to_file(&format!("Logger initialized with level: {default_level:?}"))?;

    Ok(())
}

/// Append a line to the log file only
pub fn log_to_file(message: &str) -> Result<()> {
    let log_path = ConfigManager::log_file_path()?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    writeln!(
        file,
        "[{}] {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        message
    )?;

    Ok(())
}

/// Append the outcome of every file in `report` to the log file
///
/// One summary line for the run, then one line per file in discovery order,
/// so the log keeps a history after the report file is replaced.
pub fn log_run_to_file(report: &RunReport) -> Result<()> {
    let summary = report.summary();
    let mut lines = vec![format!(
        "Run {}{}: {} uploaded, {} skipped, {} failed, {} unknown, {} cancelled",
        report.run_id,
        if report.dry_run { " (dry run)" } else { "" },
        summary.archived,
        summary.skipped,
        summary.failed(),
        summary.unknown,
        summary.cancelled
    )];
    lines.extend(report.entries.iter().map(|entry| {
        format!(
            "  {} [{}] {}",
            entry.path.display(),
            entry.source,
            entry.outcome.label()
        )
    }));

    log_to_file(&lines.join("\n"))
}

/// Rotate the log file if it exceeds the size limit (10MB)
pub fn rotate_log_if_needed() -> Result<()> {
    let log_path = ConfigManager::log_file_path()?;

    if log_path.exists() {
        let metadata = std::fs::metadata(&log_path)?;

        if metadata.len() > MAX_LOG_SIZE {
            let old_log_path = log_path.with_extension("log.old");

            if old_log_path.exists() {
                std::fs::remove_file(&old_log_path)?;
            }

            std::fs::rename(&log_path, &old_log_path)?;

            log::info!("Log file rotated to {}", old_log_path.display());
        }
    }

    Ok(())
}
