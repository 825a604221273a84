use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ShardSnap::cli::BackupArgs;

/// Crash-consistent snapshots of sharded stateful workloads.
#[derive(Parser, Debug)]
#[command(name = "shardsnap", version, about = "ShardSnap CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Freeze writes, snapshot every shard volume, wait for readiness, resume
    Backup(BackupArgs),
    /// Print a previously written output.json
    Inspect {
        /// Path to output.json (or the directory holding it)
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
