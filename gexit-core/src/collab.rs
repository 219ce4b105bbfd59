// gexit_core/src/collab.rs
//! Collaborators the exit protocol consumes but does not implement.
use std::time::Duration;

use crate::domain::{ExitCompletion, ExitOutcome, PieceRef};
use crate::error::Result;
use crate::id::NodeId;

pub trait PieceInventory: Send + Sync {
    fn pieces_for(&self, node_id: &NodeId) -> Result<Vec<PieceRef>>;
}

pub trait Placement: Send + Sync {
    /// Pick the node that should receive `piece` from the exiting node.
    fn choose_destination(&self, exiting: &NodeId, piece: &PieceRef) -> Result<NodeId>;
}

pub trait Transport: Send + Sync {
    /// Move `piece` from `exiting` to `destination` within `timeout`.
    /// Failures are reported as `ExitError::TransferFailure(code)`.
    fn send_piece(
        &self,
        exiting: &NodeId,
        destination: &NodeId,
        piece: &PieceRef,
        timeout: Duration,
    ) -> Result<()>;
}

pub trait ReceiptSigner: Send + Sync {
    fn issue_receipt(&self, outcome: &ExitOutcome) -> Result<Vec<u8>>;
}

/// Delivers the terminal outcome to the exiting node.
pub trait ExitReporter: Send + Sync {
    fn report(&self, completion: &ExitCompletion) -> Result<()>;
}
