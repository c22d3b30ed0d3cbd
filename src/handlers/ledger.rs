//! Ledger inspection and manual edits
//!
//! `mark` records a file as processed without uploading it; `forget` drops a
//! fingerprint so the next run treats the file as new.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::activity::{ActivityFile, SourceRoot, SourceTag};
use crate::classifier::SourceClassifier;
use crate::fingerprint::Fingerprint;
use crate::ledger::ProcessedFileLedger;
use crate::settings::Settings;
use crate::sources;

/// Shortest fingerprint prefix accepted by `forget`
const MIN_PREFIX_LEN: usize = 8;

fn load_ledger(settings: &Settings) -> Result<ProcessedFileLedger> {
    let path = settings.ledger_path()?;
    ProcessedFileLedger::load(&path)
        .with_context(|| format!("Cannot use the ledger at {}", path.display()))
}

/// Print all ledger entries, most recent first
pub fn handle_ledger_list() -> Result<()> {
    let settings = Settings::load()?;
    let ledger = load_ledger(&settings)?;

    println!(
        "{} {}",
        "Ledger:".bold(),
        ledger.path().display().to_string().cyan()
    );

    if ledger.is_empty() {
        println!("{}", "No processed files recorded.".yellow());
        return Ok(());
    }

    let mut entries: Vec<_> = ledger.entries().iter().collect();
    entries.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

    for entry in entries {
        let kind = if entry.manual {
            "marked".yellow()
        } else {
            "uploaded".green()
        };
        println!(
            "  {} {} {} {} {}",
            entry.fingerprint.short().dimmed(),
            entry.uploaded_at.format("%Y-%m-%d %H:%M"),
            kind,
            format!("[{}]", entry.source).cyan(),
            entry.file_name.as_deref().unwrap_or("-")
        );
        if let Some(backup) = &entry.backup_path {
            println!("      {} {}", "→".dimmed(), backup.display());
        }
    }

    println!("\n{} {}", "Total:".bold(), ledger.len());
    Ok(())
}

/// Remove a fingerprint (full or unique prefix) from the ledger
pub fn handle_ledger_forget(fingerprint: &str) -> Result<()> {
    let settings = Settings::load()?;
    let mut ledger = load_ledger(&settings)?;

    let fingerprint = resolve_fingerprint(&ledger, fingerprint)?;
    if let Some(entry) = ledger.forget(&fingerprint) {
        ledger.persist()?;
        log::info!("Forgot {} ({})", entry.fingerprint, entry.source);
        println!(
            "{} {} will be treated as new on the next run",
            "✓".green(),
            entry.file_name.as_deref().unwrap_or(fingerprint.short())
        );
    }
    Ok(())
}

/// Record a file as processed without uploading or moving it
pub fn handle_ledger_mark(path: &Path, source: Option<SourceTag>) -> Result<()> {
    let settings = Settings::load()?;
    let mut ledger = load_ledger(&settings)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file = ActivityFile::from_path(path, SourceRoot::shared(parent))
        .with_context(|| format!("Cannot read {}", path.display()))?;

    let source = match source {
        Some(tag) => tag,
        None => {
            let roots = sources::resolve_roots(&settings)?;
            SourceClassifier::from_settings(&settings, &roots).classify(&file)
        }
    };
    if !source.is_known() {
        bail!(
            "Could not tell which application produced {}; pass --source a or --source b",
            path.display()
        );
    }

    let fingerprint = file
        .fingerprint()
        .with_context(|| format!("Cannot read {}", path.display()))?
        .clone();

    if ledger.contains(&fingerprint) {
        println!("{} is already in the ledger", path.display());
        return Ok(());
    }

    let name = file.file_name().unwrap_or_default().to_string();
    ledger.mark_processed(fingerprint, source, &name)?;
    ledger.persist()?;

    println!(
        "{} Marked {} as processed ({})",
        "✓".green(),
        path.display(),
        source
    );
    Ok(())
}

/// Match `input` against the ledger as a full fingerprint or a unique prefix
fn resolve_fingerprint(ledger: &ProcessedFileLedger, input: &str) -> Result<Fingerprint> {
    let exact = Fingerprint::from_hex(input.trim());
    if ledger.contains(&exact) {
        return Ok(exact);
    }

    if exact.as_str().len() < MIN_PREFIX_LEN {
        bail!("Fingerprint prefix must be at least {MIN_PREFIX_LEN} characters");
    }

    let matches: Vec<_> = ledger
        .entries()
        .iter()
        .filter(|e| e.fingerprint.as_str().starts_with(exact.as_str()))
        .collect();

    match matches.as_slice() {
        [entry] => Ok(entry.fingerprint.clone()),
        [] => bail!("No ledger entry matches {input}"),
        _ => bail!("{} ledger entries match {input}; use more characters", matches.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ledger_with(fingerprints: &[&str]) -> (TempDir, ProcessedFileLedger) {
        let temp = TempDir::new().unwrap();
        let mut ledger = ProcessedFileLedger::new(temp.path().join("processed.json"));
        for fp in fingerprints {
            ledger
                .mark_processed(Fingerprint::from_hex(*fp), SourceTag::SimulatorA, "a.fit")
                .unwrap();
        }
        (temp, ledger)
    }

    #[test]
    fn test_resolve_exact_and_prefix() {
        let (_temp, ledger) = ledger_with(&["0123456789abcdef", "fedcba9876543210"]);

        assert_eq!(
            resolve_fingerprint(&ledger, "0123456789ABCDEF").unwrap().as_str(),
            "0123456789abcdef"
        );
        assert_eq!(
            resolve_fingerprint(&ledger, "fedcba98").unwrap().as_str(),
            "fedcba9876543210"
        );
    }

    #[test]
    fn test_resolve_rejects_short_ambiguous_and_missing() {
        let (_temp, ledger) = ledger_with(&["aaaaaaaa11", "aaaaaaaa22"]);

        assert!(resolve_fingerprint(&ledger, "aaaa").is_err());
        assert!(resolve_fingerprint(&ledger, "aaaaaaaa").is_err());
        assert!(resolve_fingerprint(&ledger, "bbbbbbbb").is_err());
    }
}
