use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use fit_uploader::activity::SourceTag;
use fit_uploader::handlers;
use fit_uploader::logger;
use fit_uploader::report;
use fit_uploader::settings::{self, SettingsUpdate};

#[derive(Parser)]
#[command(name = "fit-uploader")]
#[command(
    about = "Upload and back up MyWhoosh and TrainingPeaks Virtual FIT activities",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up backup, source directories and the upload command
    Init,

    /// List activity files and their detected source without uploading
    Scan,

    /// Upload new activity files and move them to the backup directory
    Upload {
        /// Show what would be uploaded without uploading or moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or edit the record of processed files
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Configure settings
    Config {
        /// Backup directory for uploaded files
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// MyWhoosh directories (comma-separated)
        #[arg(long)]
        simulator_a: Option<String>,

        /// TrainingPeaks Virtual directories (comma-separated)
        #[arg(long)]
        simulator_b: Option<String>,

        /// Shared directories classified by content (comma-separated)
        #[arg(long)]
        shared: Option<String>,

        /// Account shown in reports
        #[arg(long)]
        account: Option<String>,

        /// Upload program and arguments; the file path is appended
        #[arg(long)]
        upload_command: Option<String>,

        /// Total upload attempts per file
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Number of concurrent uploads
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip files older than N days
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Show current configuration
        #[arg(long)]
        show: bool,
    },

    /// View the report of the last upload run
    Report {
        /// Output format: json or markdown
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Output file (default: print to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the directories that would be scanned
    Sources,
}

#[derive(Subcommand)]
enum LedgerAction {
    /// List processed files
    List,

    /// Forget a fingerprint so the file is uploaded again
    Forget {
        /// Full fingerprint or a unique prefix (at least 8 characters)
        fingerprint: String,
    },

    /// Mark a file as processed without uploading it
    Mark {
        path: PathBuf,

        /// Producer of the file (detected when omitted)
        #[arg(long, value_enum)]
        source: Option<SourceArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    /// MyWhoosh
    #[value(alias = "mywhoosh")]
    A,
    /// TrainingPeaks Virtual
    #[value(alias = "tpv")]
    B,
}

impl From<SourceArg> for SourceTag {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::A => SourceTag::SimulatorA,
            SourceArg::B => SourceTag::SimulatorB,
        }
    }
}

fn main() -> Result<ExitCode> {
    logger::rotate_log_if_needed().ok();
    logger::init_logger()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            handlers::run_onboarding_flow()?;
        }
        Commands::Scan => {
            handlers::handle_scan()?;
        }
        Commands::Upload { dry_run } => {
            if !handlers::is_initialized()? {
                handlers::run_onboarding_flow()?;
            }
            if !handlers::handle_upload(dry_run)? {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Ledger { action } => match action {
            LedgerAction::List => handlers::handle_ledger_list()?,
            LedgerAction::Forget { fingerprint } => handlers::handle_ledger_forget(&fingerprint)?,
            LedgerAction::Mark { path, source } => {
                handlers::handle_ledger_mark(&path, source.map(SourceTag::from))?
            }
        },
        Commands::Config {
            backup_dir,
            simulator_a,
            simulator_b,
            shared,
            account,
            upload_command,
            max_attempts,
            concurrency,
            max_age_days,
            show,
        } => {
            if show {
                settings::show_settings()?;
            } else {
                settings::update_settings(SettingsUpdate {
                    account,
                    backup_dir,
                    simulator_a,
                    simulator_b,
                    shared,
                    upload_command,
                    max_attempts,
                    concurrency,
                    max_age_days,
                })?;
            }
        }
        Commands::Report { format, output } => {
            report::generate_report(&format, output.as_deref())?;
        }
        Commands::Sources => {
            handlers::handle_sources()?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
