use std::path::{Path, PathBuf};
use std::sync::Arc;

use gexit_core::error::{ExitError, Result};
use gexit_core::inventory::JsonInventory;
use gexit_core::receipt::KeyedReceiptSigner;
use gexit_core::registry::JournalRegistry;
use gexit_core::tracker::LocalReporter;
use gexit_core::{
    Backend, ExitLifecycle, ExitStatus, ExitStatusTracker, NodeId, SatelliteStores,
    SchedulerConfig, open_exit_status_store, open_satellite_stores,
};
use time::OffsetDateTime;
use tracing::debug;

use crate::presentation::cli::{ExitArgs, Verdict};

fn satellite_stores(db: &Path) -> Result<SatelliteStores> {
    let registry = JournalRegistry::new(db.join("satellite"))?;
    open_satellite_stores(Backend::Journal(&registry))
}

fn node_tracker(db: &Path) -> Result<ExitStatusTracker> {
    let registry = JournalRegistry::new(db.join("node"))?;
    let store = open_exit_status_store(Backend::Journal(&registry))?;
    Ok(ExitStatusTracker::new(store))
}

fn load_config(path: Option<PathBuf>) -> Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_json_file(&path),
        None => Ok(SchedulerConfig::default()),
    }
}

fn receipt_key(hex_key: Option<&str>) -> Result<[u8; 32]> {
    let Some(hex_key) = hex_key else {
        return Ok([0u8; 32]);
    };
    let bytes =
        hex::decode(hex_key.trim()).map_err(|e| ExitError::Format(format!("receipt key: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        ExitError::Format(format!("receipt key: want 32 bytes, got {}", b.len()))
    })
}

/// Satellite stores under `db/satellite`, reporting completions into the
/// node tracker under `db/node`.
fn exit_lifecycle(db: &Path, exit: &ExitArgs) -> Result<ExitLifecycle> {
    let satellite = NodeId::from_hex(&exit.satellite)?;
    let config = load_config(exit.config.clone())?;
    let signer = KeyedReceiptSigner::new(receipt_key(exit.receipt_key.as_deref())?);
    let reporter = LocalReporter::new(satellite, Arc::new(node_tracker(db)?));
    debug!(satellite = %satellite, "exit outcomes delivered to local node tracker");
    ExitLifecycle::new(
        &config,
        satellite_stores(db)?,
        Arc::new(signer),
        Arc::new(reporter),
    )
}

fn or_dash<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn handle_satellite_start(
    db: &Path,
    node_hex: String,
    inventory: PathBuf,
    exit: ExitArgs,
) -> Result<()> {
    let node = NodeId::from_hex(&node_hex)?;
    let inventory = JsonInventory::from_file(&inventory)?;
    let seeded = exit_lifecycle(db, &exit)?.start_exit(&inventory, &node)?;
    if seeded == 0 {
        println!("nothing to transfer; exit of {node} finalized");
    } else {
        println!("queued {seeded} pieces for {node}");
    }
    Ok(())
}

pub fn handle_satellite_progress(db: &Path, node_hex: String) -> Result<()> {
    let node = NodeId::from_hex(&node_hex)?;
    let stores = satellite_stores(db)?;
    match stores.progress.get_progress(&node) {
        Ok(p) => println!(
            "node={} bytes={} transferred={} failed={} failed_ratio={:.3} updated={}",
            p.node_id,
            p.bytes_transferred,
            p.pieces_transferred,
            p.pieces_failed,
            p.failed_ratio(),
            p.updated_at
        ),
        Err(e) if e.is_not_found() => println!("node={node}: no progress recorded"),
        Err(e) => return Err(e),
    }
    Ok(())
}

pub fn handle_satellite_queue(
    db: &Path,
    node_hex: String,
    offset: usize,
    limit: Option<usize>,
    config: Option<PathBuf>,
) -> Result<()> {
    let node = NodeId::from_hex(&node_hex)?;
    let config = load_config(config)?;
    let stores = satellite_stores(db)?;
    let now = OffsetDateTime::now_utc();
    let rows = stores
        .queue
        .get_incomplete(&node, limit.unwrap_or(config.batch_size), offset)?;
    for r in &rows {
        let state = if r.in_flight(now, config.transfer_timeout()) {
            "in-flight"
        } else {
            "waiting"
        };
        println!(
            "{:<9} path={} piece={:<4} size={:<8} ratio={:.3} failures={} last_code={} queued={}",
            state,
            hex::encode(&r.path),
            r.piece_num,
            r.piece_size,
            r.durability_ratio,
            r.failed_count,
            or_dash(r.last_failed_code),
            r.queued_at
        );
    }
    eprintln!("{} unfinished item(s) shown", rows.len());
    Ok(())
}

pub fn handle_satellite_abandon(db: &Path, node_hex: String, exit: ExitArgs) -> Result<()> {
    let node = NodeId::from_hex(&node_hex)?;
    let status = exit_lifecycle(db, &exit)?.abandon_exit(&node)?;
    println!("abandoned {node}: {status}");
    Ok(())
}

pub fn handle_satellite_compact(db: &Path) -> Result<()> {
    let stores = satellite_stores(db)?;
    stores.queue.compact()?;
    stores.progress.compact()?;
    eprintln!("compact: OK");
    Ok(())
}

pub fn handle_node_add(db: &Path, satellite_hex: String) -> Result<()> {
    let satellite = NodeId::from_hex(&satellite_hex)?;
    node_tracker(db)?.add_satellite(&satellite)
}

pub fn handle_node_initiate(db: &Path, satellite_hex: String, disk_usage: u64) -> Result<()> {
    let satellite = NodeId::from_hex(&satellite_hex)?;
    node_tracker(db)?.initiate_graceful_exit(&satellite, OffsetDateTime::now_utc(), disk_usage)
}

pub fn handle_node_update(db: &Path, satellite_hex: String, bytes_deleted: u64) -> Result<()> {
    let satellite = NodeId::from_hex(&satellite_hex)?;
    node_tracker(db)?.update_graceful_exit(&satellite, bytes_deleted)
}

pub fn handle_node_complete(
    db: &Path,
    satellite_hex: String,
    verdict: Verdict,
    receipt_hex: String,
) -> Result<()> {
    let satellite = NodeId::from_hex(&satellite_hex)?;
    let receipt = hex::decode(receipt_hex.trim())
        .map_err(|e| ExitError::Format(format!("receipt: {e}")))?;
    let status = match verdict {
        Verdict::Succeeded => ExitStatus::ExitSucceeded,
        Verdict::Failed => ExitStatus::ExitFailed,
    };
    node_tracker(db)?.complete_graceful_exit(
        &satellite,
        OffsetDateTime::now_utc(),
        status,
        receipt,
    )
}

pub fn handle_node_list(db: &Path) -> Result<()> {
    for p in node_tracker(db)?.list_graceful_exits()? {
        println!(
            "{} status={:<14} initiated={} finished={} disk_usage={} deleted={} remaining={} receipt={}",
            p.satellite_id,
            p.status,
            or_dash(p.initiated_at),
            or_dash(p.finished_at),
            p.starting_disk_usage,
            p.bytes_deleted,
            p.remaining_bytes(),
            p.completion_receipt
                .as_deref()
                .map_or_else(|| "-".to_string(), hex::encode)
        );
    }
    Ok(())
}

pub fn handle_node_compact(db: &Path) -> Result<()> {
    let registry = JournalRegistry::new(db.join("node"))?;
    open_exit_status_store(Backend::Journal(&registry))?.compact()?;
    eprintln!("compact: OK");
    Ok(())
}
