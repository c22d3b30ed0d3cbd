//! Locating the directories each application writes its activities to.
//!
//! MyWhoosh stores activities in an OS-dependent application directory that
//! is probed here; TrainingPeaks Virtual has no fixed location and must be
//! configured.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::activity::{SourceRoot, SourceTag};
use crate::settings::Settings;

/// Package-name prefixes of the Microsoft Store MyWhoosh install
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
const WINDOWS_PACKAGE_PREFIXES: &[&str] = &["TheWhooshGame", "MyWhoosh", "Whoosh", "com.whoosh"];

/// Candidate MyWhoosh directories for the current OS, existing or not
pub fn simulator_a_candidates(home: &Path) -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        macos_candidates(home)
    }

    #[cfg(target_os = "windows")]
    {
        windows_candidates(home)
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        linux_candidates(home)
    }
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn macos_candidates(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join("Library/Containers/com.whoosh.whooshgame/Data/Library/Application Support/Epic/MyWhoosh/Content/Data"),
        home.join("Library/Application Support/MyWhoosh/Content/Data"),
        home.join("Library/Application Support/Epic/MyWhoosh/Content/Data"),
        home.join("Applications/MyWhoosh.app/Contents/Resources/Data"),
        home.join("Documents/MyWhoosh"),
        home.join("MyWhoosh"),
    ]
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn windows_candidates(home: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    let packages = home.join("AppData").join("Local").join("Packages");
    if let Ok(entries) = fs::read_dir(&packages) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if WINDOWS_PACKAGE_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
            {
                let package = entry.path();
                candidates.push(package.join("LocalCache/Local/MyWhoosh/Content/Data"));
                candidates.push(package.join("LocalState/MyWhoosh/Data"));
            }
        }
    }

    candidates.push(home.join("AppData/Local/MyWhoosh/Data"));
    candidates.push(home.join("AppData/Roaming/MyWhoosh/Data"));
    candidates.push(home.join("Documents/MyWhoosh"));
    candidates.push(PathBuf::from(r"C:\Program Files\MyWhoosh\Data"));
    candidates.push(PathBuf::from(r"C:\Program Files (x86)\MyWhoosh\Data"));
    candidates
}

#[cfg_attr(any(target_os = "macos", target_os = "windows"), allow(dead_code))]
fn linux_candidates(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(".local/share/MyWhoosh"),
        home.join("MyWhoosh"),
        PathBuf::from("/opt/MyWhoosh"),
        home.join(".config/MyWhoosh/Data"),
        home.join("snap/mywhoosh/common/Data"),
        PathBuf::from("/var/lib/snapd/snap/mywhoosh/common/Data"),
        PathBuf::from("/usr/share/MyWhoosh/Data"),
    ]
}

/// Existing MyWhoosh directories on this machine
pub fn detect_simulator_a_dirs() -> Result<Vec<PathBuf>> {
    let home = dirs::home_dir().context("Failed to get home directory")?;
    let found: Vec<PathBuf> = simulator_a_candidates(&home)
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();

    if found.is_empty() {
        log::warn!("No MyWhoosh directory detected");
    } else {
        for dir in &found {
            log::debug!("Detected MyWhoosh directory: {}", dir.display());
        }
    }

    Ok(found)
}

/// Build the scan roots for a run from the settings
///
/// Configured MyWhoosh directories take precedence over auto-detection.
pub fn resolve_roots(settings: &Settings) -> Result<Vec<SourceRoot>> {
    let simulator_a = if settings.sources.simulator_a.is_empty() {
        detect_simulator_a_dirs()?
    } else {
        settings.sources.simulator_a.clone()
    };

    let mut roots: Vec<SourceRoot> = simulator_a
        .into_iter()
        .map(|p| SourceRoot::new(p, SourceTag::SimulatorA))
        .collect();

    roots.extend(
        settings
            .sources
            .simulator_b
            .iter()
            .map(|p| SourceRoot::new(p.clone(), SourceTag::SimulatorB)),
    );

    roots.extend(settings.sources.shared.iter().cloned().map(SourceRoot::shared));

    if settings.sources.simulator_b.is_empty() {
        log::info!("No TrainingPeaks Virtual directory configured");
    }

    Ok(roots)
}
