// gexit_core/src/id.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ExitError, Result};

pub fn parse_hex_array<const N: usize>(hex_str: &str) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| ExitError::Format(format!("invalid hex: {e}")))?;
    if bytes.len() != N {
        return Err(ExitError::Format(format!(
            "expected {N} bytes ({} hex chars), got {}",
            N * 2,
            bytes.len()
        )));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// 32-byte node identity. Satellites are nodes too.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

pub type SatelliteId = NodeId;

impl NodeId {
    pub fn from_hex(s: &str) -> Result<Self> {
        parse_hex_array::<32>(s).map(NodeId)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps log lines readable
        write!(f, "NodeId({}..)", &self.to_hex()[..12])
    }
}

impl FromStr for NodeId {
    type Err = ExitError;

    fn from_str(s: &str) -> Result<Self> {
        NodeId::from_hex(s)
    }
}
