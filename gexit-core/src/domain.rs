// gexit_core/src/domain.rs
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ExitError, Result};
use crate::id::{NodeId, SatelliteId};

/// Failure codes recorded in `TransferQueueItem::last_failed_code`.
pub mod failure_code {
    pub const UNKNOWN: i32 = 0;
    pub const TIMED_OUT: i32 = 1;
    pub const PIECE_NOT_FOUND: i32 = 2;
    pub const HASH_VERIFICATION: i32 = 4;
    pub const NO_DESTINATION: i32 = 5;
}

/// One piece held by a node, as reported by the piece inventory.
#[derive(Clone, Debug, PartialEq)]
pub struct PieceRef {
    pub path: Vec<u8>,
    pub piece_num: i32,
    pub size: u64,
    pub durability_ratio: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferQueueItem {
    pub node_id: NodeId,
    pub path: Vec<u8>,
    pub piece_num: i32,
    pub piece_size: u64,
    pub durability_ratio: f64,
    pub queued_at: OffsetDateTime,
    pub requested_at: Option<OffsetDateTime>,
    pub last_failed_at: Option<OffsetDateTime>,
    pub last_failed_code: Option<i32>,
    pub failed_count: u32,
    pub finished_at: Option<OffsetDateTime>,
}

impl TransferQueueItem {
    pub fn new(node_id: NodeId, piece: &PieceRef, queued_at: OffsetDateTime) -> Self {
        Self {
            node_id,
            path: piece.path.clone(),
            piece_num: piece.piece_num,
            piece_size: piece.size,
            durability_ratio: piece.durability_ratio,
            queued_at,
            requested_at: None,
            last_failed_at: None,
            last_failed_code: None,
            failed_count: 0,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// An attempt is in flight when it was requested after the last recorded
    /// failure and its timeout has not yet elapsed.
    pub fn in_flight(&self, now: OffsetDateTime, timeout: Duration) -> bool {
        if self.is_finished() {
            return false;
        }
        let Some(requested) = self.requested_at else {
            return false;
        };
        if let Some(failed) = self.last_failed_at {
            if failed >= requested {
                return false;
            }
        }
        now < requested + timeout
    }

    pub fn piece_ref(&self) -> PieceRef {
        PieceRef {
            path: self.path.clone(),
            piece_num: self.piece_num,
            size: self.piece_size,
            durability_ratio: self.durability_ratio,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub node_id: NodeId,
    pub bytes_transferred: u64,
    pub pieces_transferred: u64,
    pub pieces_failed: u64,
    pub updated_at: OffsetDateTime,
}

impl Progress {
    pub fn empty(node_id: NodeId, at: OffsetDateTime) -> Self {
        Self {
            node_id,
            bytes_transferred: 0,
            pieces_transferred: 0,
            pieces_failed: 0,
            updated_at: at,
        }
    }

    /// Share of settled pieces that were abandoned; 0 when nothing settled.
    pub fn failed_ratio(&self) -> f64 {
        let total = self.pieces_transferred + self.pieces_failed;
        if total == 0 {
            return 0.0;
        }
        self.pieces_failed as f64 / total as f64
    }
}

/// Code 0 is reserved to catch zero-valued rows and never decodes.
pub const UNEXPECTED_STATUS_CODE: u8 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ExitStatus {
    Normal = 1,
    Exiting = 2,
    ExitSucceeded = 3,
    ExitFailed = 4,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(ExitStatus::Normal),
            2 => Ok(ExitStatus::Exiting),
            3 => Ok(ExitStatus::ExitSucceeded),
            4 => Ok(ExitStatus::ExitFailed),
            UNEXPECTED_STATUS_CODE => Err(ExitError::Format("unexpected exit status (0)".into())),
            other => Err(ExitError::Format(format!("unknown exit status code {other}"))),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExitStatus::ExitSucceeded | ExitStatus::ExitFailed)
    }
}

impl TryFrom<u8> for ExitStatus {
    type Error = ExitError;

    fn try_from(code: u8) -> Result<Self> {
        ExitStatus::from_code(code)
    }
}

impl From<ExitStatus> for u8 {
    fn from(s: ExitStatus) -> u8 {
        s.code()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitStatus::Normal => "normal",
            ExitStatus::Exiting => "exiting",
            ExitStatus::ExitSucceeded => "exit-succeeded",
            ExitStatus::ExitFailed => "exit-failed",
        };
        f.pad(s)
    }
}

/// Node-side record of an exit from one satellite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExitProcess {
    pub satellite_id: SatelliteId,
    pub status: ExitStatus,
    pub initiated_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub starting_disk_usage: u64,
    pub bytes_deleted: u64,
    pub completion_receipt: Option<Vec<u8>>,
}

impl ExitProcess {
    pub fn new(satellite_id: SatelliteId) -> Self {
        Self {
            satellite_id,
            status: ExitStatus::Normal,
            initiated_at: None,
            finished_at: None,
            starting_disk_usage: 0,
            bytes_deleted: 0,
            completion_receipt: None,
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.starting_disk_usage.saturating_sub(self.bytes_deleted)
    }

    /// `finished_at` is set iff terminal, `initiated_at` iff not `Normal`.
    pub fn check_invariants(&self) -> Result<()> {
        if self.finished_at.is_some() != self.status.is_terminal() {
            return Err(ExitError::Format(format!(
                "exit record for {} is {} but finished_at is {}",
                self.satellite_id,
                self.status,
                if self.finished_at.is_some() { "set" } else { "unset" }
            )));
        }
        if self.initiated_at.is_some() == (self.status == ExitStatus::Normal) {
            return Err(ExitError::Format(format!(
                "exit record for {} is {} but initiated_at is {}",
                self.satellite_id,
                self.status,
                if self.initiated_at.is_some() { "set" } else { "unset" }
            )));
        }
        Ok(())
    }
}

/// Terminal result of an exit as decided by the satellite. This is what the
/// receipt signer certifies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExitOutcome {
    pub node_id: NodeId,
    pub status: ExitStatus,
    pub finished_at: OffsetDateTime,
    pub progress: Progress,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExitCompletion {
    pub outcome: ExitOutcome,
    pub receipt: Vec<u8>,
}
