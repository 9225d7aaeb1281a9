//! Command line interface for docflow, built on clap.
//!
//! [`Cli`] holds the subcommands ([`Command`]) and global flags
//! (`--config`, `--broker-url`, `--verbose`).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::state_machine::BatchMode;

/// Submit documents to the conversion workers and track them to completion.
#[derive(Debug, Parser)]
#[command(name = "docflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a config file (defaults to ./docflow.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Broker gateway url, overrides config and DOCFLOW_BROKER_URL.
    #[arg(long, global = true)]
    pub broker_url: Option<String>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Batch layout accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// One broker job per document.
    PerItem,
    /// One broker job for the whole batch.
    Aggregate,
}

impl From<ModeArg> for BatchMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::PerItem => BatchMode::PerItem,
            ModeArg::Aggregate => BatchMode::Aggregate,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Checks that the broker gateway answers.
    Ping,

    /// Enqueues one document and prints its job id.
    Submit {
        /// Document to convert.
        file: PathBuf,
    },

    /// Reads a job's status once.
    Poll {
        job_id: String,
    },

    /// Waits for a previously submitted job.
    Wait {
        job_id: String,

        /// Give up (and revoke the job) after this many seconds.
        #[arg(long)]
        max_wait: Option<u64>,
    },

    /// Submits one document and waits for the result.
    Convert {
        file: PathBuf,

        /// Give up (and revoke the job) after this many seconds.
        #[arg(long)]
        max_wait: Option<u64>,
    },

    /// Submits several documents as a batch and tracks them to completion.
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Batch layout; defaults to the configured mode.
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },
}

impl Command {
    /// Batch mode requested on the command line, if any.
    pub fn mode_override(&self) -> Option<BatchMode> {
        match self {
            Command::Batch { mode, .. } => mode.map(BatchMode::from),
            _ => None,
        }
    }
}
