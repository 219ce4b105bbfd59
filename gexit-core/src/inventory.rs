use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::Deserialize;

use crate::collab::PieceInventory;
use crate::domain::PieceRef;
use crate::error::{ExitError, Result};
use crate::id::NodeId;

#[derive(Deserialize)]
struct PieceRow {
    /// hex-encoded piece path
    path: String,
    piece_num: i32,
    size: u64,
    #[serde(default = "default_ratio")]
    durability_ratio: f64,
}

fn default_ratio() -> f64 {
    1.0
}

/// Piece inventory loaded from a JSON document mapping node ids (hex) to the
/// pieces they hold.
#[derive(Debug, Default)]
pub struct JsonInventory {
    by_node: HashMap<NodeId, Vec<PieceRef>>,
}

impl JsonInventory {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        Self::from_slice(&raw)
            .map_err(|e| ExitError::Format(format!("{}: {e}", path.display())))
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let doc: BTreeMap<String, Vec<PieceRow>> =
            serde_json::from_slice(raw).map_err(|e| ExitError::Format(e.to_string()))?;
        let mut by_node = HashMap::with_capacity(doc.len());
        for (node, rows) in doc {
            let node_id = NodeId::from_hex(&node)?;
            let pieces = rows
                .into_iter()
                .map(|r| {
                    Ok(PieceRef {
                        path: hex::decode(&r.path)
                            .map_err(|e| ExitError::Format(format!("piece path: {e}")))?,
                        piece_num: r.piece_num,
                        size: r.size,
                        durability_ratio: r.durability_ratio,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            by_node.insert(node_id, pieces);
        }
        Ok(Self { by_node })
    }
}

impl PieceInventory for JsonInventory {
    fn pieces_for(&self, node_id: &NodeId) -> Result<Vec<PieceRef>> {
        self.by_node
            .get(node_id)
            .cloned()
            .ok_or_else(|| ExitError::NotFound(format!("inventory for {node_id}")))
    }
}
