use std::collections::{BTreeMap, BTreeSet};
use std::collections::btree_map::Entry as BTreeEntry;

use dashmap::DashMap;
use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::domain::{ExitProcess, Progress, TransferQueueItem};
use crate::error::{ExitError, Result};
use crate::id::{NodeId, SatelliteId};
use crate::store::{ExitStatusStore, ProgressStore, TransferQueueStore};

/// One node's rows, plus the unfinished ones keyed in scheduling order.
#[derive(Debug, Default)]
struct Partition {
    rows: BTreeMap<Vec<u8>, TransferQueueItem>,
    incomplete: BTreeSet<(OffsetDateTime, Vec<u8>)>,
}

impl Partition {
    fn insert_absent(&mut self, item: &TransferQueueItem) -> bool {
        match self.rows.entry(item.path.clone()) {
            BTreeEntry::Vacant(slot) => {
                if !item.is_finished() {
                    self.incomplete.insert((item.queued_at, item.path.clone()));
                }
                slot.insert(item.clone());
                true
            }
            BTreeEntry::Occupied(_) => false,
        }
    }

    fn replace(&mut self, item: &TransferQueueItem) -> bool {
        let Some(slot) = self.rows.get_mut(&item.path) else {
            return false;
        };
        self.incomplete.remove(&(slot.queued_at, slot.path.clone()));
        if !item.is_finished() {
            self.incomplete.insert((item.queued_at, item.path.clone()));
        }
        *slot = item.clone();
        true
    }

    fn remove(&mut self, path: &[u8]) {
        if let Some(old) = self.rows.remove(path) {
            self.incomplete.remove(&(old.queued_at, old.path));
        }
    }

    fn remove_finished(&mut self) {
        self.rows.retain(|_, item| !item.is_finished());
    }

    fn incomplete_page(&self, limit: usize, offset: usize) -> Vec<TransferQueueItem> {
        self.incomplete
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(_, path)| self.rows.get(path).cloned())
            .collect()
    }
}

/// In-memory transfer queue, partitioned per node so that writers for
/// different nodes never contend on the same shard entry.
#[derive(Debug, Default)]
pub struct MemTransferQueue {
    by_node: DashMap<NodeId, Partition>,
}

impl MemTransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_absent(&self, items: &[TransferQueueItem]) -> usize {
        let mut inserted = 0;
        for item in items {
            if self.by_node.entry(item.node_id).or_default().insert_absent(item) {
                inserted += 1;
            }
        }
        inserted
    }

    pub(crate) fn contains(&self, node_id: &NodeId, path: &[u8]) -> bool {
        self.by_node
            .get(node_id)
            .is_some_and(|part| part.rows.contains_key(path))
    }

    pub(crate) fn has_node(&self, node_id: &NodeId) -> bool {
        self.by_node.contains_key(node_id)
    }

    pub(crate) fn replace(&self, item: &TransferQueueItem) -> bool {
        self.by_node
            .get_mut(&item.node_id)
            .is_some_and(|mut part| part.replace(item))
    }

    pub(crate) fn remove(&self, node_id: &NodeId, path: &[u8]) {
        if let Some(mut part) = self.by_node.get_mut(node_id) {
            part.remove(path);
        }
        self.by_node.remove_if(node_id, |_, part| part.rows.is_empty());
    }

    pub(crate) fn remove_node(&self, node_id: &NodeId) {
        self.by_node.remove(node_id);
    }

    pub(crate) fn remove_finished(&self, node_id: &NodeId) {
        if let Some(mut part) = self.by_node.get_mut(node_id) {
            part.remove_finished();
        }
        self.by_node.remove_if(node_id, |_, part| part.rows.is_empty());
    }

    /// Every row, ordered by node then path.
    pub(crate) fn snapshot(&self) -> Vec<TransferQueueItem> {
        let mut nodes: Vec<NodeId> = self.by_node.iter().map(|e| *e.key()).collect();
        nodes.sort();
        let mut out = Vec::new();
        for node in nodes {
            if let Some(part) = self.by_node.get(&node) {
                out.extend(part.rows.values().cloned());
            }
        }
        out
    }
}

impl TransferQueueStore for MemTransferQueue {
    fn enqueue(&self, items: &[TransferQueueItem]) -> Result<()> {
        self.insert_absent(items);
        Ok(())
    }

    fn get_transfer_queue_item(&self, node_id: &NodeId, path: &[u8]) -> Result<TransferQueueItem> {
        self.by_node
            .get(node_id)
            .and_then(|part| part.rows.get(path).cloned())
            .ok_or_else(|| {
                ExitError::NotFound(format!(
                    "transfer queue item {}/{}",
                    node_id,
                    hex::encode(path)
                ))
            })
    }

    fn get_incomplete(
        &self,
        node_id: &NodeId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferQueueItem>> {
        Ok(self
            .by_node
            .get(node_id)
            .map(|part| part.incomplete_page(limit, offset))
            .unwrap_or_default())
    }

    fn update_transfer_queue_item(&self, item: &TransferQueueItem) -> Result<()> {
        if self.replace(item) {
            Ok(())
        } else {
            Err(ExitError::NotFound(format!(
                "transfer queue item {}/{}",
                item.node_id,
                hex::encode(&item.path)
            )))
        }
    }

    fn delete_transfer_queue_item(&self, node_id: &NodeId, path: &[u8]) -> Result<()> {
        self.remove(node_id, path);
        Ok(())
    }

    fn delete_transfer_queue_items(&self, node_id: &NodeId) -> Result<()> {
        self.remove_node(node_id);
        Ok(())
    }

    fn delete_finished_transfer_queue_items(&self, node_id: &NodeId) -> Result<()> {
        self.remove_finished(node_id);
        Ok(())
    }

    fn exiting_nodes(&self) -> Result<Vec<NodeId>> {
        let mut nodes: Vec<NodeId> = self
            .by_node
            .iter()
            .filter(|e| !e.value().rows.is_empty())
            .map(|e| *e.key())
            .collect();
        nodes.sort();
        Ok(nodes)
    }
}

#[derive(Debug, Default)]
pub struct MemProgress {
    by_node: DashMap<NodeId, Progress>,
}

impl MemProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(
        &self,
        node_id: &NodeId,
        bytes: u64,
        pieces_transferred: u64,
        pieces_failed: u64,
        at: OffsetDateTime,
    ) {
        // entry() holds the shard lock, so the add is atomic per node
        self.by_node
            .entry(*node_id)
            .and_modify(|p| {
                p.bytes_transferred = p.bytes_transferred.saturating_add(bytes);
                p.pieces_transferred = p.pieces_transferred.saturating_add(pieces_transferred);
                p.pieces_failed = p.pieces_failed.saturating_add(pieces_failed);
                p.updated_at = p.updated_at.max(at);
            })
            .or_insert_with(|| Progress {
                node_id: *node_id,
                bytes_transferred: bytes,
                pieces_transferred,
                pieces_failed,
                updated_at: at,
            });
    }

    pub(crate) fn set(&self, progress: Progress) {
        self.by_node.insert(progress.node_id, progress);
    }

    pub(crate) fn snapshot(&self) -> Vec<Progress> {
        let mut all: Vec<Progress> = self.by_node.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|p| p.node_id);
        all
    }
}

impl ProgressStore for MemProgress {
    fn increment_progress(
        &self,
        node_id: &NodeId,
        bytes: u64,
        pieces_transferred: u64,
        pieces_failed: u64,
    ) -> Result<()> {
        self.add(
            node_id,
            bytes,
            pieces_transferred,
            pieces_failed,
            OffsetDateTime::now_utc(),
        );
        Ok(())
    }

    fn get_progress(&self, node_id: &NodeId) -> Result<Progress> {
        self.by_node
            .get(node_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| ExitError::NotFound(format!("progress for {node_id}")))
    }
}

#[derive(Debug, Default)]
pub struct MemExitStatus {
    by_satellite: RwLock<BTreeMap<SatelliteId, ExitProcess>>,
}

impl MemExitStatus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExitStatusStore for MemExitStatus {
    fn get_exit(&self, satellite_id: &SatelliteId) -> Result<Option<ExitProcess>> {
        Ok(self.by_satellite.read().get(satellite_id).cloned())
    }

    fn put_exit(&self, process: &ExitProcess) -> Result<()> {
        self.by_satellite
            .write()
            .insert(process.satellite_id, process.clone());
        Ok(())
    }

    fn list_exits(&self) -> Result<Vec<ExitProcess>> {
        Ok(self.by_satellite.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PieceRef;
    use time::macros::datetime;

    fn item(node: u8, path: &str, queued_min: u8) -> TransferQueueItem {
        let piece = PieceRef {
            path: path.as_bytes().to_vec(),
            piece_num: 1,
            size: 10,
            durability_ratio: 1.0,
        };
        let at = datetime!(2024-03-01 0:00 UTC) + time::Duration::minutes(queued_min as i64);
        TransferQueueItem::new(NodeId([node; 32]), &piece, at)
    }

    #[test]
    fn incomplete_is_ordered_by_queued_at_and_paginated() {
        let q = MemTransferQueue::new();
        q.enqueue(&[item(1, "c", 2), item(1, "a", 3), item(1, "b", 1)])
            .unwrap();

        let all = q.get_incomplete(&NodeId([1; 32]), 10, 0).unwrap();
        let paths: Vec<&[u8]> = all.iter().map(|i| i.path.as_slice()).collect();
        assert_eq!(paths, vec![&b"b"[..], &b"c"[..], &b"a"[..]]);

        let page = q.get_incomplete(&NodeId([1; 32]), 1, 1).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].path, b"c");
    }

    #[test]
    fn incomplete_index_follows_updates() {
        let q = MemTransferQueue::new();
        let node = NodeId([2; 32]);
        q.enqueue(&[item(2, "a", 1), item(2, "b", 2), item(2, "c", 3)])
            .unwrap();

        let mut a = q.get_transfer_queue_item(&node, b"a").unwrap();
        a.finished_at = Some(datetime!(2024-03-01 1:00 UTC));
        q.update_transfer_queue_item(&a).unwrap();
        let paths: Vec<Vec<u8>> = q
            .get_incomplete(&node, 10, 0)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths, vec![b"b".to_vec(), b"c".to_vec()]);

        // re-queued at a later time, behind c
        a.finished_at = None;
        a.queued_at = datetime!(2024-03-01 0:10 UTC);
        q.update_transfer_queue_item(&a).unwrap();
        let paths: Vec<Vec<u8>> = q
            .get_incomplete(&node, 10, 0)
            .unwrap()
            .into_iter()
            .map(|i| i.path)
            .collect();
        assert_eq!(paths, vec![b"b".to_vec(), b"c".to_vec(), b"a".to_vec()]);

        q.delete_finished_transfer_queue_items(&node).unwrap();
        assert_eq!(q.get_incomplete(&node, 10, 0).unwrap().len(), 3);
        q.delete_transfer_queue_item(&node, b"b").unwrap();
        let page = q.get_incomplete(&node, 1, 1).unwrap();
        assert_eq!(page[0].path, b"a");
    }

    #[test]
    fn empty_partitions_are_dropped() {
        let q = MemTransferQueue::new();
        q.enqueue(&[item(4, "x", 0)]).unwrap();
        assert_eq!(q.exiting_nodes().unwrap(), vec![NodeId([4; 32])]);

        q.delete_transfer_queue_item(&NodeId([4; 32]), b"x").unwrap();
        assert!(q.exiting_nodes().unwrap().is_empty());
        // deleting what is not there is not an error
        q.delete_transfer_queue_item(&NodeId([4; 32]), b"x").unwrap();
    }

    #[test]
    fn progress_updated_at_never_moves_backwards() {
        let p = MemProgress::new();
        let node = NodeId([9; 32]);
        p.add(&node, 1, 1, 0, datetime!(2024-03-01 12:00 UTC));
        p.add(&node, 1, 0, 1, datetime!(2024-03-01 11:00 UTC));
        let got = p.get_progress(&node).unwrap();
        assert_eq!(got.updated_at, datetime!(2024-03-01 12:00 UTC));
        assert_eq!((got.bytes_transferred, got.pieces_failed), (2, 1));
    }
}
