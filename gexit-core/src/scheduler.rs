//! Satellite-side driver that moves an exiting node's pieces elsewhere.
//!
//! All coordination goes through the stores: a dispatch first persists
//! `requested_at` (the claim), and items whose claim is younger than the
//! transfer timeout are skipped by later passes. No lock is held while a
//! transfer is on the wire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::collab::{ExitReporter, PieceInventory, Placement, ReceiptSigner, Transport};
use crate::config::SchedulerConfig;
use crate::domain::{ExitStatus, TransferQueueItem, failure_code};
use crate::error::{ExitError, Result};
use crate::id::NodeId;
use crate::lifecycle::ExitLifecycle;
use crate::store::{ProgressStore, TransferQueueStore};
use crate::store_factory::SatelliteStores;

pub struct Collaborators {
    pub inventory: Arc<dyn PieceInventory>,
    pub placement: Arc<dyn Placement>,
    pub transport: Arc<dyn Transport>,
    pub signer: Arc<dyn ReceiptSigner>,
    pub reporter: Arc<dyn ExitReporter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub dispatched: usize,
    pub transferred: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub skipped_in_flight: usize,
    /// Attempts whose row vanished underneath them (exit abandoned meanwhile).
    pub lost_races: usize,
    pub finalized: Option<ExitStatus>,
}

enum Attempt {
    Transferred,
    Failed,
    Abandoned,
    Raced,
}

pub struct TransferScheduler {
    config: SchedulerConfig,
    queue: Arc<dyn TransferQueueStore>,
    progress: Arc<dyn ProgressStore>,
    inventory: Arc<dyn PieceInventory>,
    placement: Arc<dyn Placement>,
    transport: Arc<dyn Transport>,
    lifecycle: ExitLifecycle,
    pool: rayon::ThreadPool,
}

impl TransferScheduler {
    pub fn new(
        config: SchedulerConfig,
        stores: SatelliteStores,
        collab: Collaborators,
    ) -> Result<Self> {
        let lifecycle = ExitLifecycle::new(&config, stores.clone(), collab.signer, collab.reporter)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("gexit-transfer-{i}"))
            .build()
            .map_err(|e| ExitError::Config(format!("transfer pool: {e}")))?;
        Ok(Self {
            config,
            queue: stores.queue,
            progress: stores.progress,
            inventory: collab.inventory,
            placement: collab.placement,
            transport: collab.transport,
            lifecycle,
            pool,
        })
    }

    /// See [`ExitLifecycle::start_exit`].
    pub fn start_exit(&self, node_id: &NodeId) -> Result<usize> {
        self.lifecycle.start_exit(self.inventory.as_ref(), node_id)
    }

    /// One scheduling pass over `node_id`'s queue.
    pub fn run_pass(&self, node_id: &NodeId) -> Result<PassSummary> {
        let now = OffsetDateTime::now_utc();
        let timeout = self.config.transfer_timeout();
        let batch = self.config.batch_size;
        let mut summary = PassSummary::default();

        let mut candidates = Vec::with_capacity(batch);
        let mut offset = 0;
        loop {
            let page = self.queue.get_incomplete(node_id, batch, offset)?;
            if page.is_empty() {
                if offset == 0 {
                    summary.finalized = Some(self.lifecycle.finalize(node_id)?);
                    return Ok(summary);
                }
                break;
            }
            let page_len = page.len();
            for item in page {
                if item.in_flight(now, timeout) {
                    summary.skipped_in_flight += 1;
                } else if candidates.len() < batch {
                    candidates.push(item);
                }
            }
            if candidates.len() >= batch || page_len < batch {
                break;
            }
            offset += page_len;
        }

        summary.dispatched = candidates.len();
        let results: Vec<Result<Attempt>> = self.pool.install(|| {
            candidates
                .into_par_iter()
                .map(|item| self.attempt(item, timeout))
                .collect()
        });

        let mut first_err = None;
        for r in results {
            match r {
                Ok(Attempt::Transferred) => summary.transferred += 1,
                Ok(Attempt::Failed) => summary.failed += 1,
                Ok(Attempt::Abandoned) => summary.abandoned += 1,
                Ok(Attempt::Raced) => summary.lost_races += 1,
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_err {
            warn!(node = %node_id, error = %e, "store error during pass; batch will be retried");
            return Err(e);
        }

        debug!(
            node = %node_id,
            dispatched = summary.dispatched,
            transferred = summary.transferred,
            failed = summary.failed,
            abandoned = summary.abandoned,
            in_flight = summary.skipped_in_flight,
            "transfer pass done"
        );
        Ok(summary)
    }

    /// Run one pass for every node that has queue rows. A failing node does
    /// not stop the others; its pass is retried next cycle.
    pub fn run_once(&self) -> Result<Vec<(NodeId, PassSummary)>> {
        let mut done = Vec::new();
        for node_id in self.queue.exiting_nodes()? {
            match self.run_pass(&node_id) {
                Ok(summary) => done.push((node_id, summary)),
                Err(e) => warn!(node = %node_id, error = %e, "transfer pass aborted"),
            }
        }
        Ok(done)
    }

    /// Chore loop: run passes every `interval` until `stop` is raised.
    pub fn run(&self, stop: &AtomicBool) {
        let tick = Duration::from_millis(100);
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.run_once() {
                warn!(error = %e, "listing exiting nodes failed");
            }
            let deadline = Instant::now() + self.config.interval();
            while !stop.load(Ordering::Relaxed) && Instant::now() < deadline {
                std::thread::sleep(tick.min(deadline.saturating_duration_since(Instant::now())));
            }
        }
        info!("transfer scheduler stopped");
    }

    /// See [`ExitLifecycle::abandon_exit`].
    pub fn abandon_exit(&self, node_id: &NodeId) -> Result<ExitStatus> {
        self.lifecycle.abandon_exit(node_id)
    }

    fn attempt(&self, mut item: TransferQueueItem, timeout: Duration) -> Result<Attempt> {
        // abandoned by an earlier pass that could not credit it
        if item.failed_count > self.config.max_failures {
            return self.settle_abandoned(item);
        }

        item.requested_at = Some(OffsetDateTime::now_utc());
        if !self.persist(&item)? {
            return Ok(Attempt::Raced);
        }

        let piece = item.piece_ref();
        let started = Instant::now();
        let sent = match self.placement.choose_destination(&item.node_id, &piece) {
            Ok(dest) => match self.transport.send_piece(&item.node_id, &dest, &piece, timeout) {
                Ok(()) => Ok(()),
                Err(ExitError::TransferFailure(code)) => Err(code),
                Err(e) if e.is_store_error() => return Err(e),
                Err(ExitError::NotFound(what)) => {
                    debug!(node = %item.node_id, what = %what, "piece missing on exiting node");
                    Err(failure_code::PIECE_NOT_FOUND)
                }
                Err(e) => {
                    warn!(node = %item.node_id, error = %e, "transport error");
                    Err(failure_code::UNKNOWN)
                }
            },
            Err(e) if e.is_store_error() => return Err(e),
            Err(e) => {
                debug!(node = %item.node_id, error = %e, "no destination for piece");
                Err(failure_code::NO_DESTINATION)
            }
        };
        // a late success may already have been re-dispatched
        let sent = match sent {
            Ok(()) if started.elapsed() > timeout => Err(failure_code::TIMED_OUT),
            other => other,
        };

        match sent {
            Ok(()) => self.on_success(item),
            Err(code) => self.on_failure(item, code),
        }
    }

    // Progress is credited before the item leaves the incomplete set, so a
    // store error in between leaves the item for a later pass.
    fn on_success(&self, mut item: TransferQueueItem) -> Result<Attempt> {
        if !self.still_queued(&item)? {
            return Ok(Attempt::Raced);
        }
        self.progress
            .increment_progress(&item.node_id, item.piece_size, 1, 0)?;
        item.finished_at = Some(OffsetDateTime::now_utc());
        if !self.persist(&item)? {
            return Ok(Attempt::Raced);
        }
        Ok(Attempt::Transferred)
    }

    fn on_failure(&self, mut item: TransferQueueItem, code: i32) -> Result<Attempt> {
        let at = OffsetDateTime::now_utc();
        item.failed_count += 1;
        item.last_failed_at = Some(at);
        item.last_failed_code = Some(code);
        item.requested_at = Some(at);
        if !self.persist(&item)? {
            return Ok(Attempt::Raced);
        }
        if item.failed_count > self.config.max_failures {
            return self.settle_abandoned(item);
        }
        debug!(node = %item.node_id, failures = item.failed_count, code, "piece transfer failed");
        Ok(Attempt::Failed)
    }

    /// Count the piece as failed, then take it out of scheduling. Until the
    /// second write lands the item stays unfinished past the ceiling, and
    /// every pass retries the settlement without another transfer.
    fn settle_abandoned(&self, mut item: TransferQueueItem) -> Result<Attempt> {
        if !self.still_queued(&item)? {
            return Ok(Attempt::Raced);
        }
        self.progress.increment_progress(&item.node_id, 0, 0, 1)?;
        item.finished_at = Some(OffsetDateTime::now_utc());
        if !self.persist(&item)? {
            return Ok(Attempt::Raced);
        }
        warn!(
            node = %item.node_id,
            path = %hex::encode(&item.path),
            failures = item.failed_count,
            code = ?item.last_failed_code,
            "piece abandoned"
        );
        Ok(Attempt::Abandoned)
    }

    fn still_queued(&self, item: &TransferQueueItem) -> Result<bool> {
        match self.queue.get_transfer_queue_item(&item.node_id, &item.path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(node = %item.node_id, "queue row gone; dropping attempt result");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// `false` when the row is gone, which only happens when the exit was
    /// abandoned or finalized concurrently.
    fn persist(&self, item: &TransferQueueItem) -> Result<bool> {
        match self.queue.update_transfer_queue_item(item) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!(node = %item.node_id, "queue row gone; dropping attempt result");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
