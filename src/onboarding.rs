use anyhow::{Context, Result};
use colored::Colorize;
use inquire::{Confirm, Text};
use std::path::PathBuf;

use crate::config::expand_tilde;
use crate::settings::Settings;
use crate::sources;

/// Answers collected by the first-run prompts
#[derive(Debug, Default)]
pub struct OnboardingConfig {
    pub backup_dir: PathBuf,
    pub simulator_a_dir: Option<PathBuf>,
    pub simulator_b_dir: Option<PathBuf>,
    pub account: Option<String>,
    pub upload_command: Option<String>,
}

/// Run the interactive first-run setup
pub fn run_onboarding(current: &Settings) -> Result<OnboardingConfig> {
    println!("\n{}", "⚙️  Let's configure fit-uploader!".cyan().bold());
    println!();

    // Step 1: MyWhoosh
    let detected = sources::detect_simulator_a_dirs()?;
    let simulator_a_dir = if detected.is_empty() && current.sources.simulator_a.is_empty() {
        println!("{}", "No MyWhoosh data directory was found.".yellow());
        let manual = Confirm::new("Do you want to enter the MyWhoosh directory manually?")
            .with_default(false)
            .prompt()
            .context("Failed to get MyWhoosh preference")?;

        if manual {
            let path = Text::new("MyWhoosh FIT file directory:")
                .with_help_message("The folder where MyWhoosh writes MyNewActivity-*.fit files")
                .prompt()
                .context("Failed to get MyWhoosh directory")?;
            Some(expand_tilde(path.trim())?)
        } else {
            None
        }
    } else {
        for dir in &detected {
            println!("  {} MyWhoosh directory: {}", "✓".green(), dir.display());
        }
        None
    };

    // Step 2: TrainingPeaks Virtual
    let tpv = Text::new("TrainingPeaks Virtual FITFiles directory (leave empty to skip):")
        .with_placeholder("~/Documents/TPVirtual/<id>/FITFiles")
        .with_help_message("TrainingPeaks Virtual has no fixed location, so it must be configured")
        .prompt()
        .context("Failed to get TrainingPeaks Virtual directory")?;
    let simulator_b_dir = non_empty(&tpv).map(expand_tilde).transpose()?;
    if let Some(dir) = &simulator_b_dir {
        if !dir.is_dir() {
            println!(
                "  {} {} does not exist yet",
                "⚠".yellow(),
                dir.display()
            );
        }
    }

    // Step 3: backup location
    let default_backup = current
        .backup_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "~/FitBackup".to_string());
    let backup = Text::new("Backup directory for uploaded files:")
        .with_default(&default_backup)
        .with_help_message("Uploaded files are moved here as MW_<name> or TPV_<name>")
        .prompt()
        .context("Failed to get backup directory")?;
    let backup_dir = expand_tilde(non_empty(&backup).unwrap_or(&default_backup))?;

    // Step 4: account and uploader
    let account = Text::new("Account (shown in reports, optional):")
        .prompt()
        .context("Failed to get account")?;
    let upload_command = Text::new("Upload command (the file path is appended, optional):")
        .with_placeholder("garmin-upload --token-dir ~/.garth")
        .prompt()
        .context("Failed to get upload command")?;

    println!();
    println!("{}", "✓ Configuration complete!".green().bold());

    Ok(OnboardingConfig {
        backup_dir,
        simulator_a_dir,
        simulator_b_dir,
        account: non_empty(&account).map(str::to_string),
        upload_command: non_empty(&upload_command).map(str::to_string),
    })
}

/// Merge onboarding answers into `settings`
///
/// Empty answers keep whatever was configured before.
pub fn apply_onboarding(settings: &mut Settings, config: OnboardingConfig) {
    settings.backup_dir = Some(config.backup_dir);

    if let Some(dir) = config.simulator_a_dir {
        if !settings.sources.simulator_a.contains(&dir) {
            settings.sources.simulator_a.push(dir);
        }
    }
    if let Some(dir) = config.simulator_b_dir {
        if !settings.sources.simulator_b.contains(&dir) {
            settings.sources.simulator_b.push(dir);
        }
    }
    if config.account.is_some() {
        settings.account = config.account;
    }
    if let Some(command) = config.upload_command {
        settings.upload.command = command.split_whitespace().map(str::to_string).collect();
    }
}

fn non_empty(answer: &str) -> Option<&str> {
    let trimmed = answer.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" ~/rides "), Some("~/rides"));
    }

    #[test]
    fn test_apply_onboarding_sets_answers() {
        let mut settings = Settings::default();
        apply_onboarding(
            &mut settings,
            OnboardingConfig {
                backup_dir: PathBuf::from("/backup"),
                simulator_a_dir: None,
                simulator_b_dir: Some(PathBuf::from("/tpv/FITFiles")),
                account: Some("rider@example.com".to_string()),
                upload_command: Some("garmin-upload --token-dir /t".to_string()),
            },
        );

        assert_eq!(settings.backup_dir, Some(PathBuf::from("/backup")));
        assert!(settings.sources.simulator_a.is_empty());
        assert_eq!(settings.sources.simulator_b, vec![PathBuf::from("/tpv/FITFiles")]);
        assert_eq!(settings.account.as_deref(), Some("rider@example.com"));
        assert_eq!(settings.upload.command, vec!["garmin-upload", "--token-dir", "/t"]);
    }

    #[test]
    fn test_apply_onboarding_keeps_existing_values() {
        let mut settings = Settings::default();
        settings.account = Some("kept".to_string());
        settings.sources.simulator_b = vec![PathBuf::from("/tpv")];
        settings.upload.command = vec!["uploader".to_string()];

        apply_onboarding(
            &mut settings,
            OnboardingConfig {
                backup_dir: PathBuf::from("/backup"),
                simulator_b_dir: Some(PathBuf::from("/tpv")),
                ..Default::default()
            },
        );

        assert_eq!(settings.account.as_deref(), Some("kept"));
        assert_eq!(settings.sources.simulator_b, vec![PathBuf::from("/tpv")]);
        assert_eq!(settings.upload.command, vec!["uploader"]);
    }
}
