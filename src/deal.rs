//! Deal metadata recorded alongside each stored piece.
//!
//! The full proposal payload is kept so status queries can be answered
//! without consulting anything beyond the index.

use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::fr32::PADDED_GROUP;

/// The storage deal proposal a piece was submitted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    /// Content identifier of the piece.
    pub piece_cid: String,
    /// Size of the piece in the padded domain, in bytes.
    pub piece_size: u64,
    #[serde(default)]
    pub verified_deal: bool,
    pub client: String,
    pub provider: String,
    #[serde(default)]
    pub label: String,
    pub start_epoch: i64,
    pub end_epoch: i64,
    #[serde(default)]
    pub storage_price_per_epoch: String,
    #[serde(default)]
    pub provider_collateral: String,
    #[serde(default)]
    pub client_collateral: String,
}

/// Epoch window during which the deal data must be available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealSchedule {
    pub start_epoch: i64,
    pub end_epoch: i64,
}

/// Everything recorded for a piece at allocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceDealInfo {
    pub deal_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_cid: Option<String>,
    pub deal_proposal: DealProposal,
    pub deal_schedule: DealSchedule,
    #[serde(default)]
    pub keep_unsealed: bool,
}

impl PieceDealInfo {
    /// Checks the metadata is usable before an id is allocated for it:
    /// the CIDs must parse and the declared padded size must be a positive
    /// multiple of one padded group.
    pub fn validate(&self) -> Result<(), StoreError> {
        Cid::try_from(self.deal_proposal.piece_cid.as_str())
            .map_err(|e| StoreError::InvalidDeal(format!("piece_cid: {e}")))?;
        if let Some(publish_cid) = &self.publish_cid {
            Cid::try_from(publish_cid.as_str())
                .map_err(|e| StoreError::InvalidDeal(format!("publish_cid: {e}")))?;
        }

        let size = self.deal_proposal.piece_size;
        if size == 0 || size % PADDED_GROUP as u64 != 0 {
            return Err(StoreError::InvalidDeal(format!(
                "piece_size {size} is not a positive multiple of {PADDED_GROUP}"
            )));
        }
        Ok(())
    }

    /// Length of the piece in the padded domain, as declared by the deal.
    pub fn padded_size(&self) -> u64 {
        self.deal_proposal.piece_size
    }
}

/// Well-formed metadata for tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn test_deal(piece_size: u64) -> PieceDealInfo {
    use multihash_codetable::{Code, MultihashDigest};

    let hash = Code::Sha2_256.digest(b"piece payload");
    let piece_cid = Cid::new_v1(0x55, hash).to_string(); // 0x55 = raw codec

    PieceDealInfo {
        deal_id: 7,
        publish_cid: None,
        deal_proposal: DealProposal {
            piece_cid,
            piece_size,
            verified_deal: false,
            client: "t01000".to_string(),
            provider: "t01001".to_string(),
            label: "deal-7".to_string(),
            start_epoch: 10,
            end_epoch: 200_000,
            storage_price_per_epoch: "0".to_string(),
            provider_collateral: "0".to_string(),
            client_collateral: "0".to_string(),
        },
        deal_schedule: DealSchedule {
            start_epoch: 10,
            end_epoch: 200_000,
        },
        keep_unsealed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_deal_passes() {
        test_deal(128).validate().unwrap();
        test_deal(128 * 1024).validate().unwrap();
    }

    #[test]
    fn bad_cid_is_rejected() {
        let mut deal = test_deal(128);
        deal.deal_proposal.piece_cid = "not-a-cid".to_string();
        assert!(matches!(deal.validate(), Err(StoreError::InvalidDeal(_))));
    }

    #[test]
    fn unaligned_size_is_rejected() {
        for size in [0, 1, 127, 129] {
            let deal = test_deal(size);
            assert!(
                matches!(deal.validate(), Err(StoreError::InvalidDeal(_))),
                "size {size} should not validate"
            );
        }
    }
}
