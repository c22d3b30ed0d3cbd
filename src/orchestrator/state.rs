use std::fmt;
use std::path::Path;

/// Processing stage of one file within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Classified,
    DuplicateSkip,
    Queued,
    Uploading,
    UploadSucceeded,
    UploadFailed,
    Archived,
    ArchiveFailed,
}

impl FileState {
    pub fn can_transition_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Discovered, Classified)
                | (Classified, DuplicateSkip)
                | (Classified, Queued)
                | (Queued, Uploading)
                | (Uploading, UploadSucceeded)
                | (Uploading, UploadFailed)
                | (UploadSucceeded, Archived)
                | (UploadSucceeded, ArchiveFailed)
        )
    }

    /// No further transition exists
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileState::DuplicateSkip
                | FileState::UploadFailed
                | FileState::Archived
                | FileState::ArchiveFailed
        )
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current state of one file, with transitions logged at debug level
#[derive(Debug)]
pub(crate) struct Progress<'a> {
    path: &'a Path,
    state: FileState,
}

impl<'a> Progress<'a> {
    pub(crate) fn new(path: &'a Path) -> Self {
        log::debug!("{}: {}", path.display(), FileState::Discovered);
        Self {
            path,
            state: FileState::Discovered,
        }
    }

    /// Resume tracking a file handed over in `state`
    pub(crate) fn resume(path: &'a Path, state: FileState) -> Self {
        Self { path, state }
    }

    pub(crate) fn advance(&mut self, next: FileState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {} for {}",
            self.state,
            next,
            self.path.display()
        );
        log::debug!("{}: {} -> {}", self.path.display(), self.state, next);
        self.state = next;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> FileState {
        self.state
    }
}
