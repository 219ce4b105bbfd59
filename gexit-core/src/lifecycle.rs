//! Starting, finalizing and abandoning exits.
//!
//! None of this moves pieces, so it needs no placement or transport and
//! operator tooling can drive it directly. The transfer scheduler delegates
//! here once a node's queue runs dry.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::collab::{ExitReporter, PieceInventory, ReceiptSigner};
use crate::config::SchedulerConfig;
use crate::domain::{ExitCompletion, ExitOutcome, ExitStatus, Progress, TransferQueueItem};
use crate::error::Result;
use crate::id::NodeId;
use crate::store::{ProgressStore, TransferQueueStore};
use crate::store_factory::SatelliteStores;

/// Seed the queue with one item per piece. Pieces with the lowest durability
/// ratio get the earliest `queued_at` so FIFO order serves them first.
fn seed_queue(
    queue: &dyn TransferQueueStore,
    inventory: &dyn PieceInventory,
    node_id: &NodeId,
    now: OffsetDateTime,
) -> Result<usize> {
    let mut pieces = inventory.pieces_for(node_id)?;
    pieces.sort_by(|a, b| a.durability_ratio.total_cmp(&b.durability_ratio));
    let items: Vec<TransferQueueItem> = pieces
        .iter()
        .enumerate()
        .map(|(i, p)| TransferQueueItem::new(*node_id, p, now + time::Duration::nanoseconds(i as i64)))
        .collect();
    if !items.is_empty() {
        queue.enqueue(&items)?;
    }
    Ok(items.len())
}

pub struct ExitLifecycle {
    max_failed_ratio: f64,
    queue: Arc<dyn TransferQueueStore>,
    progress: Arc<dyn ProgressStore>,
    signer: Arc<dyn ReceiptSigner>,
    reporter: Arc<dyn ExitReporter>,
}

impl ExitLifecycle {
    pub fn new(
        config: &SchedulerConfig,
        stores: SatelliteStores,
        signer: Arc<dyn ReceiptSigner>,
        reporter: Arc<dyn ExitReporter>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            max_failed_ratio: config.max_failed_ratio,
            queue: stores.queue,
            progress: stores.progress,
            signer,
            reporter,
        })
    }

    /// Begin an exit for `node_id`. Re-running it for a node already exiting
    /// adds nothing. A node holding no pieces is finalized right away.
    pub fn start_exit(&self, inventory: &dyn PieceInventory, node_id: &NodeId) -> Result<usize> {
        let seeded = seed_queue(
            self.queue.as_ref(),
            inventory,
            node_id,
            OffsetDateTime::now_utc(),
        )?;
        info!(node = %node_id, pieces = seeded, "graceful exit started");
        if seeded == 0 {
            self.finalize(node_id)?;
        }
        Ok(seeded)
    }

    /// Decide the exit from the final progress, deliver the receipt, then
    /// drop the node's rows. A delivery error keeps the rows, so the next
    /// pass finalizes again.
    pub fn finalize(&self, node_id: &NodeId) -> Result<ExitStatus> {
        let progress = self.current_progress(node_id)?;
        let status = if progress.failed_ratio() <= self.max_failed_ratio {
            ExitStatus::ExitSucceeded
        } else {
            ExitStatus::ExitFailed
        };
        self.complete(node_id, status, progress)?;
        self.queue.delete_transfer_queue_items(node_id)?;
        Ok(status)
    }

    /// Stop scheduling `node_id` and record the exit as failed. The outcome
    /// is delivered before the rows go; attempts still on the wire then find
    /// their rows gone and become no-ops.
    pub fn abandon_exit(&self, node_id: &NodeId) -> Result<ExitStatus> {
        let progress = self.current_progress(node_id)?;
        self.complete(node_id, ExitStatus::ExitFailed, progress)?;
        self.queue.delete_transfer_queue_items(node_id)?;
        warn!(node = %node_id, "graceful exit abandoned");
        Ok(ExitStatus::ExitFailed)
    }

    fn current_progress(&self, node_id: &NodeId) -> Result<Progress> {
        match self.progress.get_progress(node_id) {
            Ok(p) => Ok(p),
            Err(e) if e.is_not_found() => Ok(Progress::empty(*node_id, OffsetDateTime::now_utc())),
            Err(e) => Err(e),
        }
    }

    fn complete(&self, node_id: &NodeId, status: ExitStatus, progress: Progress) -> Result<()> {
        let (transferred, failed) = (progress.pieces_transferred, progress.pieces_failed);
        let outcome = ExitOutcome {
            node_id: *node_id,
            status,
            finished_at: OffsetDateTime::now_utc(),
            progress,
        };
        let receipt = self.signer.issue_receipt(&outcome)?;
        self.reporter.report(&ExitCompletion { outcome, receipt })?;
        info!(
            node = %node_id,
            status = %status,
            transferred,
            failed,
            "graceful exit finalized"
        );
        Ok(())
    }
}
