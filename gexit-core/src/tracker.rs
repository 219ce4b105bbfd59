//! Node-side view of graceful exits.
//!
//! ```text
//! Normal ──initiate──▶ Exiting ──complete──▶ ExitSucceeded | ExitFailed
//!                        │  ▲
//!                        └──┘ update (bytes deleted)
//! ```
//!
//! Every transition is a check-then-write against the store, so the tracker
//! serializes them behind one lock. Reads go straight to the store.

use std::sync::Arc;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::collab::ExitReporter;
use crate::domain::{ExitCompletion, ExitProcess, ExitStatus};
use crate::error::{ExitError, Result};
use crate::id::SatelliteId;
use crate::store::ExitStatusStore;

pub struct ExitStatusTracker {
    store: Arc<dyn ExitStatusStore>,
    transitions: Mutex<()>,
}

impl ExitStatusTracker {
    pub fn new(store: Arc<dyn ExitStatusStore>) -> Self {
        Self {
            store,
            transitions: Mutex::new(()),
        }
    }

    /// Record a satellite relationship in `Normal` state. No-op if known.
    pub fn add_satellite(&self, satellite_id: &SatelliteId) -> Result<()> {
        let _guard = self.transitions.lock();
        if self.store.get_exit(satellite_id)?.is_some() {
            return Ok(());
        }
        self.store.put_exit(&ExitProcess::new(*satellite_id))
    }

    pub fn initiate_graceful_exit(
        &self,
        satellite_id: &SatelliteId,
        initiated_at: OffsetDateTime,
        starting_disk_usage: u64,
    ) -> Result<()> {
        let _guard = self.transitions.lock();
        let mut process = self
            .store
            .get_exit(satellite_id)?
            .unwrap_or_else(|| ExitProcess::new(*satellite_id));
        if process.status != ExitStatus::Normal {
            return Err(ExitError::InvalidTransition(format!(
                "cannot initiate exit from {satellite_id}: already {}",
                process.status
            )));
        }
        process.status = ExitStatus::Exiting;
        process.initiated_at = Some(initiated_at);
        process.starting_disk_usage = starting_disk_usage;
        process.bytes_deleted = 0;
        self.store.put_exit(&process)?;
        info!(satellite = %satellite_id, starting_disk_usage, "graceful exit initiated");
        Ok(())
    }

    pub fn update_graceful_exit(&self, satellite_id: &SatelliteId, bytes_deleted: u64) -> Result<()> {
        let _guard = self.transitions.lock();
        let mut process = self.existing(satellite_id)?;
        if process.status != ExitStatus::Exiting {
            return Err(ExitError::InvalidTransition(format!(
                "cannot record deletions for {satellite_id}: exit is {}",
                process.status
            )));
        }
        process.bytes_deleted = process.bytes_deleted.saturating_add(bytes_deleted);
        self.store.put_exit(&process)?;
        debug!(satellite = %satellite_id, bytes_deleted, total = process.bytes_deleted, "exit deletions recorded");
        Ok(())
    }

    pub fn complete_graceful_exit(
        &self,
        satellite_id: &SatelliteId,
        finished_at: OffsetDateTime,
        exit_status: ExitStatus,
        completion_receipt: Vec<u8>,
    ) -> Result<()> {
        if !exit_status.is_terminal() {
            return Err(ExitError::InvalidTransition(format!(
                "cannot complete exit from {satellite_id} with non-terminal status {exit_status}"
            )));
        }
        let _guard = self.transitions.lock();
        let mut process = self.existing(satellite_id)?;
        if process.status != ExitStatus::Exiting {
            return Err(ExitError::InvalidTransition(format!(
                "cannot complete exit from {satellite_id}: exit is {}",
                process.status
            )));
        }
        process.status = exit_status;
        process.finished_at = Some(finished_at);
        process.completion_receipt = Some(completion_receipt);
        self.store.put_exit(&process)?;
        info!(satellite = %satellite_id, status = %exit_status, "graceful exit completed");
        Ok(())
    }

    pub fn list_graceful_exits(&self) -> Result<Vec<ExitProcess>> {
        self.store.list_exits()
    }

    pub fn get(&self, satellite_id: &SatelliteId) -> Result<ExitProcess> {
        self.existing(satellite_id)
    }

    /// Unknown satellites have no exit, hence `Normal`.
    pub fn status(&self, satellite_id: &SatelliteId) -> Result<ExitStatus> {
        Ok(self
            .store
            .get_exit(satellite_id)?
            .map_or(ExitStatus::Normal, |p| p.status))
    }

    fn existing(&self, satellite_id: &SatelliteId) -> Result<ExitProcess> {
        self.store
            .get_exit(satellite_id)?
            .ok_or_else(|| ExitError::NotFound(format!("exit record for satellite {satellite_id}")))
    }
}

/// Delivers a satellite's completion to a tracker running in the same process.
pub struct LocalReporter {
    satellite_id: SatelliteId,
    tracker: Arc<ExitStatusTracker>,
}

impl LocalReporter {
    pub fn new(satellite_id: SatelliteId, tracker: Arc<ExitStatusTracker>) -> Self {
        Self {
            satellite_id,
            tracker,
        }
    }
}

impl ExitReporter for LocalReporter {
    fn report(&self, completion: &ExitCompletion) -> Result<()> {
        match self.tracker.status(&self.satellite_id)? {
            // a repeated report after a crash finds the exit already terminal
            status @ (ExitStatus::ExitSucceeded | ExitStatus::ExitFailed) => {
                debug!(satellite = %self.satellite_id, %status, "completion already recorded");
                return Ok(());
            }
            // exit was started by the satellite; the node learns of it now
            ExitStatus::Normal => {
                info!(satellite = %self.satellite_id, "satellite-driven exit");
                self.tracker.initiate_graceful_exit(
                    &self.satellite_id,
                    completion.outcome.finished_at,
                    completion.outcome.progress.bytes_transferred,
                )?;
            }
            ExitStatus::Exiting => {}
        }
        self.tracker.complete_graceful_exit(
            &self.satellite_id,
            completion.outcome.finished_at,
            completion.outcome.status,
            completion.receipt.clone(),
        )
    }
}
