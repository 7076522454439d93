// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::store::DEFAULT_HISTORY_LIMIT;
use crate::types::EncryptionMode;

/// Command-line arguments for `borgsched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "borgsched",
    version,
    about = "Schedule and run borg backup jobs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Borgsched.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Borgsched.toml", global = true)]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BORGSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print repositories, jobs and next fire times, but
    /// don't run anything.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the scheduler until Ctrl-C (the default).
    Daemon,

    /// Run one job now and print the run record.
    Run {
        /// Job name (`[job.<name>]`).
        job: String,
    },

    /// Show recent runs of a job, newest first.
    History {
        job: String,

        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },

    /// Initialize a repository with `borg init`.
    Init {
        /// Repository name (`[repository.<name>]`).
        repository: String,

        /// Overrides the repository's `encryption_mode`.
        #[arg(long, value_name = "MODE")]
        encryption: Option<EncryptionMode>,
    },

    /// List the archives in a repository.
    Archives { repository: String },

    /// Show repository statistics, or one archive's details.
    Info {
        repository: String,

        #[arg(long, value_name = "NAME")]
        archive: Option<String>,
    },

    /// List the files in an archive.
    Contents {
        repository: String,
        archive: String,

        /// Only list entries below this path.
        #[arg(long)]
        path: Option<String>,
    },

    /// Delete an archive.
    Delete { repository: String, archive: String },

    /// Check that a repository is reachable.
    Check { repository: String },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
