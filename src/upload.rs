//! Upload client seam.
//!
//! The fitness service's API and authentication live outside this crate. The
//! orchestrator only needs to know whether an upload worked and, if not,
//! whether trying again could help.

use std::path::Path;
use std::process::Command;

/// Exit code meaning the activity already exists remotely
pub const EXIT_ALREADY_UPLOADED: i32 = 3;

/// Exit code for temporary failures (sysexits `EX_TEMPFAIL`)
pub const EXIT_TEMPORARY_FAILURE: i32 = 75;

/// Result of one upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Success,
    /// Network trouble, rate limiting: worth another attempt
    RetryableFailure(String),
    /// Rejected file, expired session: retrying cannot help
    FatalFailure(String),
}

/// Performs the actual upload of one file
///
/// Implementations must be callable from several worker threads at once.
pub trait UploadClient: Send + Sync {
    fn upload(&self, path: &Path) -> UploadResult;
}

/// Uploads by running an external program with the file path appended
///
/// Exit status mapping:
/// - `0` success
/// - `3` already present on the service, treated as success
/// - `75` or killed by a signal: retryable
/// - anything else, or a failure to start the program: fatal
#[derive(Debug, Clone)]
pub struct CommandUploadClient {
    program: String,
    args: Vec<String>,
}

impl CommandUploadClient {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from `upload.command` (program followed by its arguments)
    pub fn from_command_line(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl UploadClient for CommandUploadClient {
    fn upload(&self, path: &Path) -> UploadResult {
        let output = match Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                return UploadResult::FatalFailure(format!(
                    "Failed to run upload command '{}': {}",
                    self.program, e
                ))
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let reason = |fallback: String| if stderr.is_empty() { fallback } else { stderr.clone() };

        match output.status.code() {
            Some(0) => UploadResult::Success,
            Some(EXIT_ALREADY_UPLOADED) => {
                log::info!("{} is already present on the service", path.display());
                UploadResult::Success
            }
            Some(EXIT_TEMPORARY_FAILURE) => {
                UploadResult::RetryableFailure(reason("temporary upload failure".to_string()))
            }
            Some(code) => UploadResult::FatalFailure(reason(format!("upload command exited with {code}"))),
            None => UploadResult::RetryableFailure(reason("upload command was terminated".to_string())),
        }
    }
}

/// Stand-in used when no upload command is configured; every upload fails
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredClient;

impl UploadClient for UnconfiguredClient {
    fn upload(&self, _path: &Path) -> UploadResult {
        UploadResult::FatalFailure("no upload command configured".to_string())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandUploadClient {
        CommandUploadClient::new("sh", vec!["-c".to_string(), script.to_string(), "upload".to_string()])
    }

    #[test]
    fn test_exit_codes_map_to_results() {
        let path = Path::new("/tmp/ride.fit");
        assert_eq!(sh("exit 0").upload(path), UploadResult::Success);
        assert_eq!(sh("exit 3").upload(path), UploadResult::Success);
        assert_eq!(
            sh("echo 'rate limited' >&2; exit 75").upload(path),
            UploadResult::RetryableFailure("rate limited".to_string())
        );
        assert_eq!(
            sh("exit 2").upload(path),
            UploadResult::FatalFailure("upload command exited with 2".to_string())
        );
    }

    #[test]
    fn test_path_is_appended() {
        // $1 is the appended path because "upload" fills $0
        let client = sh("test \"$1\" = /tmp/ride.fit");
        assert_eq!(client.upload(Path::new("/tmp/ride.fit")), UploadResult::Success);
    }

    #[test]
    fn test_missing_program_is_fatal() {
        let client = CommandUploadClient::new("/nonexistent/uploader", Vec::new());
        assert!(matches!(
            client.upload(Path::new("/tmp/ride.fit")),
            UploadResult::FatalFailure(_)
        ));
    }

    #[test]
    fn test_unconfigured_client_fails() {
        assert!(matches!(
            UnconfiguredClient.upload(Path::new("/tmp/ride.fit")),
            UploadResult::FatalFailure(_)
        ));
    }

    #[test]
    fn test_from_command_line() {
        assert!(CommandUploadClient::from_command_line(&[]).is_none());
        let client = CommandUploadClient::from_command_line(&[
            "garmin-upload".to_string(),
            "--token-dir".to_string(),
            "/t".to_string(),
        ])
        .unwrap();
        assert_eq!(client.program, "garmin-upload");
        assert_eq!(client.args, vec!["--token-dir", "/t"]);
    }
}
