use crate::collab::ReceiptSigner;
use crate::domain::ExitOutcome;
use crate::error::{ExitError, Result};

const TAG_LEN: usize = 32;

/// Development signer: `cbor(outcome) || blake3_keyed(key, cbor)`.
/// Production deployments plug their own signer in through [`ReceiptSigner`].
pub struct KeyedReceiptSigner {
    key: [u8; 32],
}

impl KeyedReceiptSigner {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn verify(&self, receipt: &[u8]) -> Result<ExitOutcome> {
        if receipt.len() < TAG_LEN {
            return Err(ExitError::Format("receipt too short".into()));
        }
        let (body, tag) = receipt.split_at(receipt.len() - TAG_LEN);
        let expected = blake3::keyed_hash(&self.key, body);
        if expected != *tag {
            return Err(ExitError::Format("receipt tag mismatch".into()));
        }
        serde_cbor::from_slice(body).map_err(|e| ExitError::Format(format!("receipt body: {e}")))
    }
}

impl ReceiptSigner for KeyedReceiptSigner {
    fn issue_receipt(&self, outcome: &ExitOutcome) -> Result<Vec<u8>> {
        let mut body = serde_cbor::to_vec(outcome)
            .map_err(|e| ExitError::Format(format!("receipt body: {e}")))?;
        let tag = blake3::keyed_hash(&self.key, &body);
        body.extend_from_slice(tag.as_bytes());
        Ok(body)
    }
}
