pub mod handlers;

use crate::presentation::cli::{Cli, Commands, NodeCommands, SatelliteCommands};
use clap::Parser;
use gexit_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let db = cli.db;
    match cli.command {
        Commands::Satellite(cmd) => match cmd {
            SatelliteCommands::Start {
                node,
                inventory,
                exit,
            } => handlers::handle_satellite_start(&db, node, inventory, exit),
            SatelliteCommands::Progress { node } => handlers::handle_satellite_progress(&db, node),
            SatelliteCommands::Queue {
                node,
                offset,
                limit,
                config,
            } => handlers::handle_satellite_queue(&db, node, offset, limit, config),
            SatelliteCommands::Abandon { node, exit } => {
                handlers::handle_satellite_abandon(&db, node, exit)
            }
            SatelliteCommands::Compact => handlers::handle_satellite_compact(&db),
        },
        Commands::Node(cmd) => match cmd {
            NodeCommands::Add { satellite } => handlers::handle_node_add(&db, satellite),
            NodeCommands::Initiate {
                satellite,
                disk_usage,
            } => handlers::handle_node_initiate(&db, satellite, disk_usage),
            NodeCommands::Update {
                satellite,
                bytes_deleted,
            } => handlers::handle_node_update(&db, satellite, bytes_deleted),
            NodeCommands::Complete {
                satellite,
                status,
                receipt_hex,
            } => handlers::handle_node_complete(&db, satellite, status, receipt_hex),
            NodeCommands::List => handlers::handle_node_list(&db),
            NodeCommands::Compact => handlers::handle_node_compact(&db),
        },
    }
}
