use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::activity::SourceTag;
use crate::config::ConfigManager;
use crate::fingerprint::Fingerprint;

/// Final state of one discovered file at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Uploaded, moved to the backup directory and recorded in the ledger
    Archived { backup_path: PathBuf },

    /// Already in the ledger, or identical to a file handled earlier in the run
    SkippedDuplicate,

    UploadFailed {
        reason: String,
        /// Whether the last failure was temporary (the retry limit ran out)
        retryable: bool,
        attempts: u32,
    },

    /// Uploaded but not backed up; the file stays in place and is uploaded
    /// again on a later run
    ArchiveFailed { reason: String },

    /// Uploaded and backed up, but the ledger could not be written; the
    /// backup is not known to later runs
    RecordFailed { backup_path: PathBuf, reason: String },

    UnknownSource,

    /// Not started before the run was cancelled
    Cancelled,

    /// Would be uploaded (dry runs only)
    Pending,
}

impl FileOutcome {
    /// Short label used in console and Markdown output
    pub fn label(&self) -> String {
        match self {
            FileOutcome::Archived { .. } => "Uploaded+Archived".to_string(),
            FileOutcome::SkippedDuplicate => "SkippedDuplicate".to_string(),
            FileOutcome::UploadFailed { reason, .. } => format!("UploadFailed:{reason}"),
            FileOutcome::ArchiveFailed { reason } => format!("ArchiveFailed:{reason}"),
            FileOutcome::RecordFailed { reason, .. } => format!("RecordFailed:{reason}"),
            FileOutcome::UnknownSource => "Unknown source".to_string(),
            FileOutcome::Cancelled => "Cancelled".to_string(),
            FileOutcome::Pending => "Pending".to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FileOutcome::UploadFailed { .. }
                | FileOutcome::ArchiveFailed { .. }
                | FileOutcome::RecordFailed { .. }
        )
    }
}

/// One line of the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub path: PathBuf,
    pub source: SourceTag,

    /// Missing when the file could not be read
    pub fingerprint: Option<Fingerprint>,

    pub outcome: FileOutcome,
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub archived: usize,
    pub skipped: usize,
    pub upload_failed: usize,
    pub archive_failed: usize,
    pub record_failed: usize,
    pub unknown: usize,
    pub cancelled: usize,
    pub pending: usize,
}

impl RunSummary {
    /// Files that failed at any stage
    pub fn failed(&self) -> usize {
        self.upload_failed + self.archive_failed + self.record_failed
    }
}

/// Everything that happened to the files discovered in one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Account the uploads were made for, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    #[serde(default)]
    pub dry_run: bool,

    /// In discovery order
    pub entries: Vec<ReportEntry>,
}

impl RunReport {
    /// Empty report for a run starting now
    pub fn begin(account: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            account,
            dry_run: false,
            entries: Vec::new(),
        }
    }

    pub fn finish(mut self, entries: Vec<ReportEntry>) -> Self {
        self.entries = entries;
        self.finished_at = Utc::now();
        self
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in &self.entries {
            match entry.outcome {
                FileOutcome::Archived { .. } => summary.archived += 1,
                FileOutcome::SkippedDuplicate => summary.skipped += 1,
                FileOutcome::UploadFailed { .. } => summary.upload_failed += 1,
                FileOutcome::ArchiveFailed { .. } => summary.archive_failed += 1,
                FileOutcome::RecordFailed { .. } => summary.record_failed += 1,
                FileOutcome::UnknownSource => summary.unknown += 1,
                FileOutcome::Cancelled => summary.cancelled += 1,
                FileOutcome::Pending => summary.pending += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| e.outcome.is_failure())
    }

    /// Entries whose outcome matches `predicate`
    pub fn entries_where<'a>(
        &'a self,
        predicate: impl Fn(&FileOutcome) -> bool + 'a,
    ) -> impl Iterator<Item = &'a ReportEntry> + 'a {
        self.entries.iter().filter(move |e| predicate(&e.outcome))
    }

    /// Generate a markdown report
    pub fn to_markdown(&self) -> String {
        let summary = self.summary();
        let mut output = String::new();

        output.push_str("# FIT Upload Report\n\n");
        output.push_str(&format!("**Run:** `{}`\n", self.run_id));
        output.push_str(&format!("**Started:** {}\n", self.started_at.to_rfc3339()));
        output.push_str(&format!("**Finished:** {}\n", self.finished_at.to_rfc3339()));
        if let Some(account) = &self.account {
            output.push_str(&format!("**Account:** {account}\n"));
        }
        if self.dry_run {
            output.push_str("**Dry run:** nothing was uploaded or moved\n");
        }
        output.push('\n');

        output.push_str("| Outcome | Files |\n|---|---|\n");
        for (label, count) in [
            ("Uploaded+Archived", summary.archived),
            ("SkippedDuplicate", summary.skipped),
            ("UploadFailed", summary.upload_failed),
            ("ArchiveFailed", summary.archive_failed),
            ("RecordFailed", summary.record_failed),
            ("Unknown source", summary.unknown),
            ("Cancelled", summary.cancelled),
            ("Pending", summary.pending),
        ] {
            if count > 0 {
                output.push_str(&format!("| {label} | {count} |\n"));
            }
        }
        output.push('\n');

        if self.entries.is_empty() {
            output.push_str("No activity files found.\n");
            return output;
        }

        output.push_str("## Files\n\n");
        for entry in &self.entries {
            output.push_str(&format!(
                "- `{}` ({}): {}\n",
                entry.path.display(),
                entry.source,
                entry.outcome.label()
            ));
            if let FileOutcome::Archived { backup_path } | FileOutcome::RecordFailed { backup_path, .. } =
                &entry.outcome
            {
                output.push_str(&format!("  - Backup: `{}`\n", backup_path.display()));
            }
        }

        let unarchived: Vec<_> = self
            .entries_where(|o| matches!(o, FileOutcome::ArchiveFailed { .. }))
            .collect();
        let unrecorded: Vec<_> = self
            .entries_where(|o| matches!(o, FileOutcome::RecordFailed { .. }))
            .collect();
        if !unarchived.is_empty() || !unrecorded.is_empty() {
            output.push_str("\n## Needs manual attention\n\n");
        }
        if !unarchived.is_empty() {
            output.push_str("These files were uploaded but could not be backed up:\n\n");
            for entry in unarchived {
                output.push_str(&format!("- `{}`\n", entry.path.display()));
            }
        }
        if !unrecorded.is_empty() {
            output.push_str(
                "\nThese files were uploaded and backed up but are missing from the ledger:\n\n",
            );
            for entry in unrecorded {
                if let FileOutcome::RecordFailed { backup_path, .. } = &entry.outcome {
                    output.push_str(&format!(
                        "- `{}` (backup `{}`)\n",
                        entry.path.display(),
                        backup_path.display()
                    ));
                }
            }
        }

        output
    }

    /// Generate a JSON report
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report to JSON")
    }

    /// Print a colored console summary
    pub fn print_summary(&self) {
        let summary = self.summary();

        let title = if self.dry_run {
            "=== Upload Plan (dry run) ==="
        } else {
            "=== Upload Report ==="
        };
        println!("\n{}", title.bold().cyan());
        if let Some(account) = &self.account {
            println!("{}: {}", "Account".bold(), account);
        }

        if self.entries.is_empty() {
            println!("\n{}", "No activity files found.".green());
            return;
        }

        println!();
        for entry in &self.entries {
            let name = entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| entry.path.display().to_string());
            let label = entry.outcome.label();
            let label = match &entry.outcome {
                FileOutcome::Archived { .. } => label.green(),
                FileOutcome::SkippedDuplicate | FileOutcome::Pending => label.cyan(),
                FileOutcome::UnknownSource | FileOutcome::Cancelled => label.yellow(),
                FileOutcome::UploadFailed { .. }
                | FileOutcome::ArchiveFailed { .. }
                | FileOutcome::RecordFailed { .. } => label.red(),
            };
            println!("  {} {} {}", name.bold(), format!("[{}]", entry.source).dimmed(), label);
        }

        println!();
        println!(
            "{} {}  {} {}  {} {}  {} {}",
            "Uploaded:".bold(),
            summary.archived.to_string().green(),
            "Skipped:".bold(),
            summary.skipped.to_string().cyan(),
            "Failed:".bold(),
            summary.failed().to_string().red(),
            "Unknown:".bold(),
            summary.unknown.to_string().yellow()
        );
        if summary.cancelled > 0 {
            println!(
                "{} {}",
                "Cancelled before upload:".bold(),
                summary.cancelled.to_string().yellow()
            );
        }
        if summary.pending > 0 {
            println!("{} {}", "Would upload:".bold(), summary.pending.to_string().cyan());
        }
        if summary.archive_failed > 0 {
            println!(
                "\n{}",
                "Some files were uploaded but not backed up and need manual attention."
                    .yellow()
            );
        }
        if summary.record_failed > 0 {
            println!(
                "\n{}",
                "Some backed-up files are missing from the ledger. Record them with 'fit-uploader ledger mark <backup> --source <a|b>'."
                    .yellow()
            );
        }
    }

    /// Save report to file
    pub fn save(&self, path: &Path, format: &str) -> Result<()> {
        let content = match format.to_lowercase().as_str() {
            "json" => self.to_json()?,
            "markdown" | "md" => self.to_markdown(),
            _ => return Err(anyhow::anyhow!("Unsupported format: {format}")),
        };

        fs::write(path, content)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;

        println!(
            "{} {}",
            "Report saved to:".green().bold(),
            path.display().to_string().cyan()
        );

        Ok(())
    }
}

/// Render the latest run report to stdout or a file
pub fn generate_report(format: &str, output: Option<&Path>) -> Result<()> {
    let Some(report) = load_latest_report()? else {
        println!("{}", "No upload run has been recorded yet.".yellow());
        return Ok(());
    };

    if let Some(output_path) = output {
        report.save(output_path, format)?;
    } else {
        match format.to_lowercase().as_str() {
            "json" => println!("{}", report.to_json()?),
            "markdown" | "md" => println!("{}", report.to_markdown()),
            _ => report.print_summary(),
        }
    }

    Ok(())
}

/// Load the report of the most recent run, if any
pub fn load_latest_report() -> Result<Option<RunReport>> {
    load_report_from(&ConfigManager::run_report_path()?)
}

pub fn load_report_from(path: &Path) -> Result<Option<RunReport>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read report from {}", path.display()))?;
    let report = serde_json::from_str(&content).context("Failed to parse run report")?;
    Ok(Some(report))
}

/// Keep `report` as the latest run report
pub fn save_run_report(report: &RunReport) -> Result<()> {
    ConfigManager::ensure_config_dir()?;
    save_report_to(report, &ConfigManager::run_report_path()?)
}

pub fn save_report_to(report: &RunReport, path: &Path) -> Result<()> {
    let content = report.to_json()?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
