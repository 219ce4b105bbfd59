#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod id;

pub mod journal;
pub mod registry;
pub mod store;
pub mod store_factory;

pub mod collab;
pub mod inventory;
pub mod lifecycle;
pub mod receipt;

pub mod scheduler;
pub mod tracker;

// Re-exports: stable API surface
pub use config::SchedulerConfig;
pub use domain::{ExitProcess, ExitStatus, Progress, TransferQueueItem};
pub use error::{ExitError, Result};
pub use id::{NodeId, SatelliteId};
pub use lifecycle::ExitLifecycle;
pub use scheduler::{Collaborators, PassSummary, TransferScheduler};
pub use store_factory::{Backend, SatelliteStores, open_exit_status_store, open_satellite_stores};
pub use tracker::ExitStatusTracker;
