//! Upload command handler

use anyhow::{bail, Context, Result};
use colored::Colorize;

use crate::ledger::ProcessedFileLedger;
use crate::logger::log_run_to_file;
use crate::orchestrator::{RunError, UploadOrchestrator};
use crate::report::save_run_report;
use crate::settings::Settings;
use crate::upload::{CommandUploadClient, UnconfiguredClient, UploadClient};

/// Upload every new activity file and back it up
///
/// Returns `false` when at least one file failed, so the caller can set a
/// non-zero exit status. With `dry_run` nothing is uploaded, moved or
/// recorded.
pub fn handle_upload(dry_run: bool) -> Result<bool> {
    let settings = Settings::load()?;

    let client: Box<dyn UploadClient> =
        match CommandUploadClient::from_command_line(&settings.upload.command) {
            Some(client) => Box::new(client),
            None if dry_run => Box::new(UnconfiguredClient),
            None => bail!(
                "No upload command configured. Run 'fit-uploader config --upload-command \"<program> [args]\"'"
            ),
        };

    let orchestrator = UploadOrchestrator::from_settings(&settings, client)?;
    if orchestrator.roots().is_empty() {
        println!(
            "{}",
            "No source directories found. Configure them with 'fit-uploader config'.".yellow()
        );
        return Ok(true);
    }

    let ledger_path = settings.ledger_path()?;
    let mut ledger = ProcessedFileLedger::load(&ledger_path)
        .with_context(|| format!("Cannot use the ledger at {}", ledger_path.display()))?;

    if dry_run {
        println!("{}", "Planning upload (dry run)...".cyan().bold());
        let report = orchestrator.plan(&ledger);
        report.print_summary();
        log_run_to_file(&report)?;
        return Ok(true);
    }

    println!("{}", "Uploading new activity files...".cyan().bold());
    let (report, stopped) = match orchestrator.run(&mut ledger) {
        Ok(report) => (report, None),
        Err(RunError { report, source }) => (*report, Some(source)),
    };

    report.print_summary();
    save_run_report(&report).context("Failed to save run report")?;

    let summary = report.summary();
    log::info!(
        "Run {} finished: {} uploaded, {} skipped, {} failed, {} unknown",
        report.run_id,
        summary.archived,
        summary.skipped,
        summary.failed(),
        summary.unknown
    );
    log_run_to_file(&report)?;

    if let Some(e) = stopped {
        return Err(anyhow::Error::new(e).context(format!(
            "Upload run stopped because the ledger at {} could not be updated",
            ledger_path.display()
        )));
    }

    Ok(!report.has_failures())
}
