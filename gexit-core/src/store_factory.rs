use std::sync::Arc;

use crate::error::Result;
use crate::registry::JournalRegistry;
use crate::store::journal::{JournalExitStatus, JournalProgress, JournalTransferQueue};
use crate::store::memory::{MemExitStatus, MemProgress, MemTransferQueue};
use crate::store::{ExitStatusStore, ProgressStore, TransferQueueStore};

pub enum Backend<'a> {
    Memory,
    Journal(&'a JournalRegistry),
}

#[derive(Clone)]
pub struct SatelliteStores {
    pub queue: Arc<dyn TransferQueueStore>,
    pub progress: Arc<dyn ProgressStore>,
}

pub fn open_satellite_stores(backend: Backend<'_>) -> Result<SatelliteStores> {
    match backend {
        Backend::Memory => Ok(SatelliteStores {
            queue: Arc::new(MemTransferQueue::new()),
            progress: Arc::new(MemProgress::new()),
        }),
        Backend::Journal(registry) => Ok(SatelliteStores {
            queue: Arc::new(JournalTransferQueue::open(registry)?),
            progress: Arc::new(JournalProgress::open(registry)?),
        }),
    }
}

pub fn open_exit_status_store(backend: Backend<'_>) -> Result<Arc<dyn ExitStatusStore>> {
    match backend {
        Backend::Memory => Ok(Arc::new(MemExitStatus::new())),
        Backend::Journal(registry) => Ok(Arc::new(JournalExitStatus::open(registry)?)),
    }
}
