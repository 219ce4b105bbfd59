use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "gexitdev: graceful exit operator CLI", long_about = None)]
pub struct Cli {
    /// Directory holding the satellite and node journals
    #[arg(long, global = true, default_value = "gexit-data")]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(subcommand)]
    /// Satellite side: transfer queue and progress
    Satellite(SatelliteCommands),

    #[command(subcommand)]
    /// Node side: per-satellite exit status
    Node(NodeCommands),
}

#[derive(Subcommand)]
pub enum SatelliteCommands {
    /// Seed the transfer queue for an exiting node from a piece inventory.
    /// A node holding nothing is finalized on the spot.
    Start {
        /// exiting node id (32-byte hex)
        node: String,
        /// JSON inventory: { "<node hex>": [{ "path": "<hex>", "piece_num": 1, "size": 1024 }] }
        #[arg(long)]
        inventory: PathBuf,
        #[command(flatten)]
        exit: ExitArgs,
    },

    /// Print transfer progress for a node
    Progress { node: String },

    /// List a node's unfinished transfer queue items, oldest first
    Queue {
        node: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// defaults to the configured batch size
        #[arg(long)]
        limit: Option<usize>,
        /// scheduler config (JSON); only the timeout and batch size are used here
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Fail a node's exit: issue the failure receipt, then drop its queue
    Abandon {
        node: String,
        #[command(flatten)]
        exit: ExitArgs,
    },

    /// Rewrite the satellite journals as snapshots
    Compact,
}

/// Where a finalized exit is signed and delivered.
#[derive(Args)]
pub struct ExitArgs {
    /// satellite id (32-byte hex) recorded in the node's exit status
    #[arg(long)]
    pub satellite: String,
    /// receipt signing key (32-byte hex); all zeroes when omitted
    #[arg(long = "receipt-key")]
    pub receipt_key: Option<String>,
    /// scheduler config (JSON); only the failure tolerance is used here
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Register a trusted satellite (status normal)
    Add { satellite: String },

    /// Begin a graceful exit from a satellite
    Initiate {
        satellite: String,
        /// bytes stored for this satellite when the exit starts
        #[arg(long = "disk-usage")]
        disk_usage: u64,
    },

    /// Record bytes deleted while exiting
    Update {
        satellite: String,
        #[arg(long = "bytes-deleted")]
        bytes_deleted: u64,
    },

    /// Record the satellite's verdict
    Complete {
        satellite: String,
        #[arg(long, value_enum)]
        status: Verdict,
        /// completion receipt (hex)
        #[arg(long = "receipt", default_value = "")]
        receipt_hex: String,
    },

    /// List exit records for all known satellites
    List,

    /// Rewrite the node journal as a snapshot
    Compact,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Verdict {
    Succeeded,
    Failed,
}
