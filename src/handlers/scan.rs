//! Scan command handler
//!
//! Lists candidate files with their detected source and whether the ledger
//! already knows them. Nothing is uploaded or moved.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::activity::SourceTag;
use crate::classifier::SourceClassifier;
use crate::ledger::ProcessedFileLedger;
use crate::scanner::DirectoryScanner;
use crate::settings::Settings;
use crate::sources;

pub fn handle_scan() -> Result<()> {
    let settings = Settings::load()?;
    let roots = sources::resolve_roots(&settings)?;
    let scanner = DirectoryScanner::from_settings(&settings);
    let classifier = SourceClassifier::from_settings(&settings, &roots);

    let ledger_path = settings.ledger_path()?;
    let ledger = ProcessedFileLedger::load(&ledger_path)
        .with_context(|| format!("Cannot use the ledger at {}", ledger_path.display()))?;

    println!("{}", "Scanning for activity files...".cyan().bold());

    let mut total = 0;
    let mut new_files = 0;
    let mut unknown = 0;

    for file in scanner.scan(&roots) {
        total += 1;
        let source = classifier.classify(&file);

        let (short, status) = match file.fingerprint() {
            Ok(fp) if ledger.contains(fp) => (fp.short().to_string(), "processed".dimmed()),
            Ok(fp) if source == SourceTag::Unknown => {
                unknown += 1;
                (fp.short().to_string(), "unknown source".yellow())
            }
            Ok(fp) => {
                new_files += 1;
                (fp.short().to_string(), "new".green())
            }
            Err(e) => (String::from("-"), format!("unreadable: {e}").red()),
        };

        println!(
            "  {} {} {} {}",
            file.path().display().to_string().bold(),
            format!("[{source}]").cyan(),
            short.dimmed(),
            status
        );
    }

    println!();
    if total == 0 {
        println!("{}", "No activity files found.".yellow());
    } else {
        println!(
            "{} {}  {} {}  {} {}",
            "Found:".bold(),
            total,
            "New:".bold(),
            new_files.to_string().green(),
            "Unknown:".bold(),
            unknown.to_string().yellow()
        );
    }

    Ok(())
}
