use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::activity::{ActivityFile, SourceTag};
use crate::error::ArchiveError;
use crate::fingerprint;

/// Moves uploaded activity files into the shared backup directory
///
/// Each archived file is renamed `<prefix><original name>` where the prefix
/// is `MW_` for MyWhoosh and `TPV_` for TrainingPeaks Virtual. Existing
/// backups are never overwritten.
#[derive(Debug, Clone)]
pub struct BackupArchiver {
    backup_dir: PathBuf,
}

impl BackupArchiver {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Destination an activity of `source` named `file_name` would get
    pub fn destination_for(&self, file_name: &str, source: SourceTag) -> Result<PathBuf, ArchiveError> {
        let prefix = source
            .backup_prefix()
            .ok_or(ArchiveError::UnsupportedSource(source))?;
        Ok(self.backup_dir.join(format!("{prefix}{file_name}")))
    }

    /// Move `file` into the backup directory and return its new path
    pub fn archive(&self, file: &ActivityFile, source: SourceTag) -> Result<PathBuf, ArchiveError> {
        let file_name = file
            .file_name()
            .ok_or_else(|| ArchiveError::InvalidName(file.path().to_path_buf()))?;
        let destination = self.destination_for(file_name, source)?;

        fs::create_dir_all(&self.backup_dir).map_err(|e| ArchiveError::io(&self.backup_dir, e))?;

        // Linking fails when the destination exists, so two workers racing
        // for the same backup name cannot replace each other's file
        match fs::hard_link(file.path(), &destination) {
            Ok(()) => {
                if let Err(e) = fs::remove_file(file.path()) {
                    let _ = fs::remove_file(&destination);
                    return Err(ArchiveError::io(file.path(), e));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArchiveError::Collision(destination));
            }
            Err(e) => {
                if is_cross_device(&e) {
                    log::debug!(
                        "{} is on another filesystem, copying instead",
                        file.path().display()
                    );
                } else {
                    log::debug!(
                        "Cannot link {} into the backup directory ({}), copying instead",
                        file.path().display(),
                        e
                    );
                }
                copy_verify_move(file.path(), &destination)?;
            }
        }

        log::info!(
            "Archived {} as {}",
            file.path().display(),
            destination.display()
        );
        Ok(destination)
    }
}

/// Copy `source` to `destination`, verify the copy and only then delete
/// `source`
///
/// The destination is created exclusively, so an existing backup is never
/// touched. A copy that fails verification is removed again.
pub(crate) fn copy_verify_move(source: &Path, destination: &Path) -> Result<(), ArchiveError> {
    let mut writer = match OpenOptions::new().write(true).create_new(true).open(destination) {
        Ok(writer) => writer,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(ArchiveError::Collision(destination.to_path_buf()));
        }
        Err(e) => return Err(ArchiveError::io(destination, e)),
    };

    let result = (|| {
        let mut reader = fs::File::open(source).map_err(|e| ArchiveError::io(source, e))?;
        io::copy(&mut reader, &mut writer).map_err(|e| ArchiveError::io(destination, e))?;
        writer.sync_all().map_err(|e| ArchiveError::io(destination, e))?;
        verify_copy(source, destination)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(destination);
        return Err(e);
    }

    fs::remove_file(source).map_err(|e| ArchiveError::io(source, e))
}

fn verify_copy(source: &Path, copy: &Path) -> Result<(), ArchiveError> {
    let source_len = fs::metadata(source)
        .map_err(|e| ArchiveError::io(source, e))?
        .len();
    let copy_len = fs::metadata(copy).map_err(|e| ArchiveError::io(copy, e))?.len();
    if source_len != copy_len {
        return Err(ArchiveError::VerificationFailed {
            path: source.to_path_buf(),
            reason: format!("size mismatch ({source_len} vs {copy_len} bytes)"),
        });
    }

    let expected = fingerprint::fingerprint(source).map_err(|e| ArchiveError::io(source, e))?;
    let actual = fingerprint::fingerprint(copy).map_err(|e| ArchiveError::io(copy, e))?;
    if expected != actual {
        return Err(ArchiveError::VerificationFailed {
            path: source.to_path_buf(),
            reason: "content fingerprint mismatch".to_string(),
        });
    }

    Ok(())
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18; // EXDEV
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    err.raw_os_error() == Some(CROSS_DEVICE)
}
