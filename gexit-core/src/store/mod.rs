// gexit_core/src/store/mod.rs
use crate::domain::{ExitProcess, Progress, TransferQueueItem};
use crate::error::Result;
use crate::id::{NodeId, SatelliteId};

pub mod journal;
pub mod memory;

/// Satellite-side queue of pieces owed by exiting nodes, keyed by `(node_id, path)`.
pub trait TransferQueueStore: Send + Sync {
    /// Insert items whose key is not present yet; existing rows are left untouched.
    fn enqueue(&self, items: &[TransferQueueItem]) -> Result<()>;

    fn get_transfer_queue_item(&self, node_id: &NodeId, path: &[u8]) -> Result<TransferQueueItem>;

    /// Unfinished items, oldest `queued_at` first.
    fn get_incomplete(
        &self,
        node_id: &NodeId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferQueueItem>>;

    /// Full-row update. `NotFound` when the row is gone.
    fn update_transfer_queue_item(&self, item: &TransferQueueItem) -> Result<()>;

    fn delete_transfer_queue_item(&self, node_id: &NodeId, path: &[u8]) -> Result<()>;

    fn delete_transfer_queue_items(&self, node_id: &NodeId) -> Result<()>;

    fn delete_finished_transfer_queue_items(&self, node_id: &NodeId) -> Result<()>;

    /// Nodes that currently own at least one queue row.
    fn exiting_nodes(&self) -> Result<Vec<NodeId>>;

    fn compact(&self) -> Result<()> {
        Ok(())
    }
}

pub trait ProgressStore: Send + Sync {
    /// Atomically add the deltas, creating the record on first use.
    fn increment_progress(
        &self,
        node_id: &NodeId,
        bytes: u64,
        pieces_transferred: u64,
        pieces_failed: u64,
    ) -> Result<()>;

    fn get_progress(&self, node_id: &NodeId) -> Result<Progress>;

    fn compact(&self) -> Result<()> {
        Ok(())
    }
}

/// Node-side rows of `ExitProcess`, one per satellite. Transition rules live
/// in [`crate::tracker::ExitStatusTracker`].
pub trait ExitStatusStore: Send + Sync {
    fn get_exit(&self, satellite_id: &SatelliteId) -> Result<Option<ExitProcess>>;

    fn put_exit(&self, process: &ExitProcess) -> Result<()>;

    /// Every record, ordered by satellite id.
    fn list_exits(&self) -> Result<Vec<ExitProcess>>;

    fn compact(&self) -> Result<()> {
        Ok(())
    }
}
