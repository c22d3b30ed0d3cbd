//! Onboarding and initialization handlers
//!
//! Handles the first-time setup flow including checking initialization
//! status and running the interactive prompts.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::ConfigManager;
use crate::onboarding;
use crate::settings::Settings;

/// Check if fit-uploader has been configured
pub fn is_initialized() -> Result<bool> {
    let settings_path = ConfigManager::settings_path()?;
    Ok(settings_path.exists())
}

/// Run the onboarding prompts and save the resulting settings
pub fn run_onboarding_flow() -> Result<()> {
    let mut settings = Settings::load().context("Failed to load current settings")?;

    let answers = onboarding::run_onboarding(&settings).context("Onboarding cancelled or failed")?;
    onboarding::apply_onboarding(&mut settings, answers);

    settings.save().context("Failed to save settings")?;
    log::info!("Settings written to {}", ConfigManager::settings_path()?.display());

    println!("{}", "✓ Ready to upload!".green().bold());
    if settings.upload.command.is_empty() {
        println!(
            "  {} No upload command set yet; use {} before uploading.",
            "Note:".yellow(),
            "fit-uploader config --upload-command".cyan()
        );
    }
    println!(
        "  Run {} to preview what would be uploaded.",
        "fit-uploader upload --dry-run".cyan()
    );
    println!();

    Ok(())
}
