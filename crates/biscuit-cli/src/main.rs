//! Biscuit command line tool.
//!
//! Inspects BIDS MEG folders and transfers projects, subjects and sessions
//! into an archive with verified copies.

mod commands;

use anyhow::Result;
use biscuit_core::copy::ChecksumAlgorithm;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "biscuit")]
#[command(about = "Inspect and merge BIDS MEG datasets", version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings directory (defaults to the user config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Clone)]
struct TransferArgs {
    /// Replace conflicting files in the destination
    #[arg(long)]
    overwrite: bool,

    /// Skip checksum verification of copied files
    #[arg(long)]
    no_verify: bool,

    /// Checksum used for verification (sha256, blake3, md5)
    #[arg(long, default_value = "sha256")]
    algorithm: ChecksumAlgorithm,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the project/subject/session/scan hierarchy of a folder
    Tree { root: PathBuf },

    /// List scans matching the given entities
    Scans {
        root: PathBuf,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        task: Option<String>,
        #[arg(long = "acq")]
        acquisition: Option<String>,
        #[arg(long)]
        run: Option<String>,
    },

    /// Show what merging SRC into DST would do, without writing anything
    Plan {
        src: PathBuf,
        /// Destination project (defaults to the archive path from settings)
        dst: Option<PathBuf>,
        #[arg(long)]
        overwrite: bool,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge the project folder SRC into DST
    Merge {
        src: PathBuf,
        /// Destination project (defaults to the archive path from settings)
        dst: Option<PathBuf>,
        #[command(flatten)]
        transfer: TransferArgs,
        /// Rename SRC to `<name>_copied` after a successful merge
        #[arg(long)]
        mark_copied: bool,
    },

    /// Add one subject (or one of its sessions) of SRC to the project DST
    Add {
        src: PathBuf,
        dst: PathBuf,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: Option<String>,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Print the BIDS paths a converted recording is written to
    Name {
        #[arg(long)]
        subject: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        task: Option<String>,
        #[arg(long = "acq")]
        acquisition: Option<String>,
        #[arg(long)]
        run: Option<u32>,
        /// Extension of the raw data file
        #[arg(long, default_value = ".con")]
        ext: String,
    },

    /// Copy a single file with checksum verification
    Copy {
        src: PathBuf,
        dst: PathBuf,
        #[arg(long, default_value = "sha256")]
        algorithm: ChecksumAlgorithm,
    },

    /// Set the dataset name in a project's dataset_description.json
    SetName { project: PathBuf, name: String },

    /// Set the group of a participant in a project's participants.tsv
    SetGroup {
        project: PathBuf,
        participant: String,
        group: String,
    },

    /// Merge editable fields from a JSON object into a sidecar file
    Sidecar { sidecar: PathBuf, fields: String },

    /// Write a README for a project from its stored settings
    Readme {
        project_id: String,
        /// Output file (prints to stdout when omitted)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    debug!("Running {:?}", args.command);
    commands::run(args).await
}
