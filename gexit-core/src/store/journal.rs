//! Persistent stores: every mutation is appended to a journal before it is
//! applied to the in-memory index, and the index is rebuilt from the journal
//! on open.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use crate::domain::{ExitProcess, Progress, TransferQueueItem};
use crate::error::{ExitError, Result};
use crate::id::{NodeId, SatelliteId};
use crate::journal::Journal;
use crate::registry::{JournalLease, JournalRegistry};
use crate::store::memory::{MemExitStatus, MemProgress, MemTransferQueue};
use crate::store::{ExitStatusStore, ProgressStore, TransferQueueStore};

const SNAPSHOT_CHUNK: usize = 1024;

#[derive(Serialize, Deserialize, Clone, Debug)]
enum QueueRecord {
    Enqueue(Vec<TransferQueueItem>),
    Update(TransferQueueItem),
    Delete { node_id: NodeId, path: Vec<u8> },
    DeleteNode { node_id: NodeId },
    DeleteFinished { node_id: NodeId },
}

fn apply_queue(index: &MemTransferQueue, rec: &QueueRecord) {
    match rec {
        QueueRecord::Enqueue(items) => {
            index.insert_absent(items);
        }
        QueueRecord::Update(item) => {
            index.replace(item);
        }
        QueueRecord::Delete { node_id, path } => index.remove(node_id, path),
        QueueRecord::DeleteNode { node_id } => index.remove_node(node_id),
        QueueRecord::DeleteFinished { node_id } => index.remove_finished(node_id),
    }
}

pub struct JournalTransferQueue {
    index: MemTransferQueue,
    journal: Mutex<Journal<QueueRecord>>,
    _lease: JournalLease,
}

impl JournalTransferQueue {
    pub const NAME: &'static str = "transfer_queue";

    pub fn open(registry: &JournalRegistry) -> Result<Self> {
        let lease = registry.acquire(Self::NAME)?;
        let (journal, records) = Journal::open(lease.path())?;
        let index = MemTransferQueue::new();
        for rec in &records {
            apply_queue(&index, rec);
        }
        info!(
            journal = %lease.path().display(),
            records = records.len(),
            nodes = index.exiting_nodes()?.len(),
            "transfer queue opened"
        );
        Ok(Self {
            index,
            journal: Mutex::new(journal),
            _lease: lease,
        })
    }

    // Caller holds the journal lock, so the log order is the apply order.
    fn commit(&self, journal: &mut Journal<QueueRecord>, rec: QueueRecord) -> Result<()> {
        journal.append(&rec)?;
        apply_queue(&self.index, &rec);
        Ok(())
    }
}

impl TransferQueueStore for JournalTransferQueue {
    fn enqueue(&self, items: &[TransferQueueItem]) -> Result<()> {
        let mut journal = self.journal.lock();
        let fresh: Vec<TransferQueueItem> = items
            .iter()
            .filter(|i| !self.index.contains(&i.node_id, &i.path))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        self.commit(&mut journal, QueueRecord::Enqueue(fresh))
    }

    fn get_transfer_queue_item(&self, node_id: &NodeId, path: &[u8]) -> Result<TransferQueueItem> {
        self.index.get_transfer_queue_item(node_id, path)
    }

    fn get_incomplete(
        &self,
        node_id: &NodeId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferQueueItem>> {
        self.index.get_incomplete(node_id, limit, offset)
    }

    fn update_transfer_queue_item(&self, item: &TransferQueueItem) -> Result<()> {
        let mut journal = self.journal.lock();
        if !self.index.contains(&item.node_id, &item.path) {
            return Err(ExitError::NotFound(format!(
                "transfer queue item {}/{}",
                item.node_id,
                hex::encode(&item.path)
            )));
        }
        self.commit(&mut journal, QueueRecord::Update(item.clone()))
    }

    fn delete_transfer_queue_item(&self, node_id: &NodeId, path: &[u8]) -> Result<()> {
        let mut journal = self.journal.lock();
        if !self.index.contains(node_id, path) {
            return Ok(());
        }
        self.commit(
            &mut journal,
            QueueRecord::Delete {
                node_id: *node_id,
                path: path.to_vec(),
            },
        )
    }

    fn delete_transfer_queue_items(&self, node_id: &NodeId) -> Result<()> {
        let mut journal = self.journal.lock();
        if !self.index.has_node(node_id) {
            return Ok(());
        }
        self.commit(&mut journal, QueueRecord::DeleteNode { node_id: *node_id })
    }

    fn delete_finished_transfer_queue_items(&self, node_id: &NodeId) -> Result<()> {
        let mut journal = self.journal.lock();
        if !self.index.has_node(node_id) {
            return Ok(());
        }
        self.commit(&mut journal, QueueRecord::DeleteFinished { node_id: *node_id })
    }

    fn exiting_nodes(&self) -> Result<Vec<NodeId>> {
        self.index.exiting_nodes()
    }

    fn compact(&self) -> Result<()> {
        let mut journal = self.journal.lock();
        let rows = self.index.snapshot();
        let recs: Vec<QueueRecord> = rows
            .chunks(SNAPSHOT_CHUNK)
            .map(|c| QueueRecord::Enqueue(c.to_vec()))
            .collect();
        journal.rewrite(&recs)?;
        info!(rows = rows.len(), "transfer queue compacted");
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
enum ProgressRecord {
    Increment {
        node_id: NodeId,
        bytes: u64,
        pieces_transferred: u64,
        pieces_failed: u64,
        at: OffsetDateTime,
    },
    Snapshot(Progress),
}

pub struct JournalProgress {
    index: MemProgress,
    journal: Mutex<Journal<ProgressRecord>>,
    _lease: JournalLease,
}

impl JournalProgress {
    pub const NAME: &'static str = "progress";

    pub fn open(registry: &JournalRegistry) -> Result<Self> {
        let lease = registry.acquire(Self::NAME)?;
        let (journal, records) = Journal::open(lease.path())?;
        let index = MemProgress::new();
        for rec in records {
            match rec {
                ProgressRecord::Increment {
                    node_id,
                    bytes,
                    pieces_transferred,
                    pieces_failed,
                    at,
                } => index.add(&node_id, bytes, pieces_transferred, pieces_failed, at),
                ProgressRecord::Snapshot(p) => index.set(p),
            }
        }
        info!(journal = %lease.path().display(), "progress store opened");
        Ok(Self {
            index,
            journal: Mutex::new(journal),
            _lease: lease,
        })
    }
}

impl ProgressStore for JournalProgress {
    fn increment_progress(
        &self,
        node_id: &NodeId,
        bytes: u64,
        pieces_transferred: u64,
        pieces_failed: u64,
    ) -> Result<()> {
        let at = OffsetDateTime::now_utc();
        let mut journal = self.journal.lock();
        journal.append(&ProgressRecord::Increment {
            node_id: *node_id,
            bytes,
            pieces_transferred,
            pieces_failed,
            at,
        })?;
        self.index
            .add(node_id, bytes, pieces_transferred, pieces_failed, at);
        Ok(())
    }

    fn get_progress(&self, node_id: &NodeId) -> Result<Progress> {
        self.index.get_progress(node_id)
    }

    fn compact(&self) -> Result<()> {
        let mut journal = self.journal.lock();
        let recs: Vec<ProgressRecord> = self
            .index
            .snapshot()
            .into_iter()
            .map(ProgressRecord::Snapshot)
            .collect();
        journal.rewrite(&recs)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
enum ExitRecord {
    Put(ExitProcess),
}

pub struct JournalExitStatus {
    index: MemExitStatus,
    journal: Mutex<Journal<ExitRecord>>,
    _lease: JournalLease,
}

impl JournalExitStatus {
    pub const NAME: &'static str = "exit_process";

    pub fn open(registry: &JournalRegistry) -> Result<Self> {
        let lease = registry.acquire(Self::NAME)?;
        let (journal, records) = Journal::open(lease.path())?;
        let index = MemExitStatus::new();
        for rec in records {
            let ExitRecord::Put(process) = rec;
            process.check_invariants()?;
            index.put_exit(&process)?;
        }
        Ok(Self {
            index,
            journal: Mutex::new(journal),
            _lease: lease,
        })
    }
}

impl ExitStatusStore for JournalExitStatus {
    fn get_exit(&self, satellite_id: &SatelliteId) -> Result<Option<ExitProcess>> {
        self.index.get_exit(satellite_id)
    }

    fn put_exit(&self, process: &ExitProcess) -> Result<()> {
        let mut journal = self.journal.lock();
        journal.append(&ExitRecord::Put(process.clone()))?;
        self.index.put_exit(process)
    }

    fn list_exits(&self) -> Result<Vec<ExitProcess>> {
        self.index.list_exits()
    }

    fn compact(&self) -> Result<()> {
        let mut journal = self.journal.lock();
        let recs: Vec<ExitRecord> = self
            .index
            .list_exits()?
            .into_iter()
            .map(ExitRecord::Put)
            .collect();
        journal.rewrite(&recs)?;
        Ok(())
    }
}
