use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime};
use walkdir::{DirEntry, WalkDir};

use crate::activity::{ActivityFile, SourceRoot};
use crate::settings::Settings;

/// Lists candidate activity files under the configured source roots
///
/// Every call to [`DirectoryScanner::scan`] walks the roots again from
/// scratch; nothing is remembered between scans.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    extension: String,
    max_age: Option<Duration>,
    recursive: bool,
}

impl Default for DirectoryScanner {
    fn default() -> Self {
        Self::new("fit")
    }
}

impl DirectoryScanner {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.trim().trim_start_matches('.').to_ascii_lowercase(),
            max_age: None,
            recursive: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut scanner = Self::new(&settings.extension).recursive(settings.recursive);
        if let Some(days) = settings.max_age_days {
            scanner = scanner.max_age_days(days);
        }
        scanner
    }

    /// Skip files not modified within the last `days` days
    pub fn max_age_days(mut self, days: u32) -> Self {
        self.max_age = Some(Duration::from_secs(u64::from(days) * 24 * 60 * 60));
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Lazily yield the activity files under `roots`
    ///
    /// Roots that do not exist are skipped; files come out in the order the
    /// filesystem enumerates them.
    pub fn scan<'a>(&'a self, roots: &'a [SourceRoot]) -> impl Iterator<Item = ActivityFile> + 'a {
        let depth = if self.recursive { usize::MAX } else { 1 };

        roots
            .iter()
            .filter(|root| {
                if root.path.is_dir() {
                    true
                } else {
                    log::debug!("Skipping missing source directory {}", root.path.display());
                    false
                }
            })
            .flat_map(move |root| {
                WalkDir::new(&root.path)
                    .max_depth(depth)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(move |entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            log::warn!("Failed to read entry under {}: {}", root.path.display(), e);
                            None
                        }
                    })
                    .filter_map(move |entry| self.accept(&entry, root))
            })
    }

    fn has_extension(&self, entry: &DirEntry) -> bool {
        entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    fn accept(&self, entry: &DirEntry, root: &SourceRoot) -> Option<ActivityFile> {
        if !entry.file_type().is_file() || !self.has_extension(entry) {
            return None;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("Failed to stat {}: {}", entry.path().display(), e);
                return None;
            }
        };

        // Files still being written by the simulator are empty
        if metadata.len() == 0 {
            log::debug!("Skipping empty file {}", entry.path().display());
            return None;
        }

        let modified = metadata.modified().ok();
        if let (Some(max_age), Some(modified)) = (self.max_age, modified) {
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if age > max_age {
                log::debug!("Skipping old file {}", entry.path().display());
                return None;
            }
        }

        Some(ActivityFile::new(
            entry.path().to_path_buf(),
            root.clone(),
            metadata.len(),
            modified.map(DateTime::<Utc>::from),
        ))
    }
}
