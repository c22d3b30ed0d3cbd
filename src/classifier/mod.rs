//! Deciding which application produced an activity file.
//!
//! Two signals are combined in a fixed order:
//!
//! 1. **Directory of origin**: the scan root carries a source hint, or the
//!    file lives under a canonical directory of exactly one source. This is
//!    explicit user configuration and always wins.
//! 2. **Content cues**: producer fields decoded by a [`FitInspector`], or
//!    byte markers when those are inconclusive. Used only for files found in
//!    shared or unconfigured locations.
//!
//! When neither signal is conclusive the file is `Unknown` and is never
//! uploaded.

pub mod inspector;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::activity::{ActivityFile, SourceRoot, SourceTag};
use crate::fingerprint::Fingerprint;
use crate::settings::Settings;

pub use inspector::{ContentCues, DecodingInspector, FitEvidence, FitInspector, MarkerInspector};

pub struct SourceClassifier {
    canonical_dirs: Vec<(PathBuf, SourceTag)>,
    inspector: Box<dyn FitInspector>,
    content_verdicts: Mutex<HashMap<Fingerprint, Option<SourceTag>>>,
}

impl SourceClassifier {
    pub fn new(inspector: Box<dyn FitInspector>) -> Self {
        Self {
            canonical_dirs: Vec::new(),
            inspector,
            content_verdicts: Mutex::new(HashMap::new()),
        }
    }

    /// Classifier for a run: canonical directories come from the hinted roots
    pub fn from_settings(settings: &Settings, roots: &[SourceRoot]) -> Self {
        let mut classifier = Self::new(Box::new(DecodingInspector::from_settings(&settings.markers)));
        for root in roots {
            if let Some(tag) = root.hint {
                classifier = classifier.with_canonical_dir(root.path.clone(), tag);
            }
        }
        classifier
    }

    /// Register a directory whose files belong to `tag`
    pub fn with_canonical_dir(mut self, dir: impl Into<PathBuf>, tag: SourceTag) -> Self {
        if tag.is_known() {
            self.canonical_dirs.push((dir.into(), tag));
        }
        self
    }

    /// Classify a file and record the result on it
    pub fn classify(&self, file: &ActivityFile) -> SourceTag {
        if file.is_classified() {
            return file.source();
        }

        let tag = match self.directory_signal(file) {
            Some(tag) => {
                log::debug!(
                    "{} classified as {} by directory",
                    file.path().display(),
                    tag
                );
                tag
            }
            None => match self.content_signal(file) {
                Some(tag) => {
                    log::debug!("{} classified as {} by content", file.path().display(), tag);
                    tag
                }
                None => {
                    log::info!(
                        "Could not determine the source of {}",
                        file.path().display()
                    );
                    SourceTag::Unknown
                }
            },
        };

        file.set_source(tag)
    }

    /// Source implied by where the file was found
    ///
    /// With nested canonical directories the most specific one applies.
    pub fn directory_signal(&self, file: &ActivityFile) -> Option<SourceTag> {
        if let Some(tag) = file.root().hint.filter(SourceTag::is_known) {
            return Some(tag);
        }

        let resolved = file.path().canonicalize().ok();
        self.canonical_dirs
            .iter()
            .filter(|(dir, _)| is_under(file.path(), resolved.as_deref(), dir))
            .max_by_key(|(dir, _)| dir.components().count())
            .map(|(_, tag)| *tag)
    }

    /// Source implied by markers inside the file, cached per fingerprint
    pub fn content_signal(&self, file: &ActivityFile) -> Option<SourceTag> {
        let fingerprint = match file.fingerprint() {
            Ok(fp) => Some(fp.clone()),
            Err(e) => {
                log::debug!("No fingerprint for {}: {}", file.path().display(), e);
                None
            }
        };

        if let Some(fp) = &fingerprint {
            if let Some(cached) = self.cached_verdict(fp) {
                return cached;
            }
        }

        let verdict = match self.inspector.inspect(file.path()) {
            Ok(cues) => cues.verdict(),
            Err(e) => {
                log::warn!("Failed to inspect {}: {}", file.path().display(), e);
                None
            }
        };

        if let Some(fp) = fingerprint {
            if let Ok(mut cache) = self.content_verdicts.lock() {
                cache.entry(fp).or_insert(verdict);
            }
        }

        verdict
    }

    fn cached_verdict(&self, fingerprint: &Fingerprint) -> Option<Option<SourceTag>> {
        self.content_verdicts
            .lock()
            .ok()
            .and_then(|cache| cache.get(fingerprint).copied())
    }
}

fn is_under(path: &Path, resolved: Option<&Path>, dir: &Path) -> bool {
    if path.starts_with(dir) {
        return true;
    }
    match (resolved, dir.canonicalize()) {
        (Some(resolved), Ok(dir)) => resolved.starts_with(dir),
        _ => false,
    }
}
