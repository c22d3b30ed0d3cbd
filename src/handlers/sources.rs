//! Source directory overview

use anyhow::Result;
use colored::Colorize;

use crate::settings::Settings;
use crate::sources;

/// Show the directories a run would scan and the backup target
pub fn handle_sources() -> Result<()> {
    let settings = Settings::load()?;
    let roots = sources::resolve_roots(&settings)?;

    println!("{}", "Source directories:".bold());
    if roots.is_empty() {
        println!("  {}", "None found or configured".yellow());
    }

    for root in &roots {
        let label = root
            .hint
            .map(|tag| tag.display_name())
            .unwrap_or("Shared (by content)");
        let state = if root.path.is_dir() {
            "✓".green()
        } else {
            "missing".red()
        };
        println!(
            "  {} {}: {}",
            state,
            label.cyan(),
            root.path.display()
        );
    }

    if settings.sources.simulator_a.is_empty() {
        println!(
            "\n  {}",
            "MyWhoosh directories are auto-detected; set them with --simulator-a to override."
                .dimmed()
        );
    }

    println!();
    match &settings.backup_dir {
        Some(dir) => println!("{} {}", "Backup directory:".bold(), dir.display()),
        None => println!("{} {}", "Backup directory:".bold(), "Not set".yellow()),
    }

    Ok(())
}
