//! Settlement errors and recorded data anomalies

use merkle_dist::MerkleError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{Stage, SubAccountId};
use crate::prices::PriceRegime;

/// Errors that abort a settlement run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementError {
    /// A non-zero amount must be valued but its underlying has no price
    #[error("missing {regime} price for {underlying}")]
    MissingPrice {
        regime: PriceRegime,
        underlying: String,
    },

    /// A balance event cannot be applied to the snapshot
    #[error("event {transaction} touches {underlying} which {account} does not hold")]
    InconsistentEvent {
        account: String,
        underlying: String,
        transaction: String,
    },

    /// Amount string is malformed or carries more precision than its decimals
    #[error("invalid amount {value:?} at {decimals} decimals")]
    InvalidAmount { value: String, decimals: u8 },

    /// A pass was run out of order
    #[error("{pass} needs a ledger at stage {expected}, found {found}")]
    StageOrder {
        pass: &'static str,
        expected: Stage,
        found: Stage,
    },

    /// Claim-to-NAV cap below 1.0
    #[error("claim to NAV cap must be at least 1.0, got {0}")]
    InvalidCap(String),

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

pub type Result<T, E = SettlementError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnomalyKind {
    /// Settlement-priced net deposit came out negative and was clamped to zero
    NegativeNetDeposit,
    /// Redemption-priced net deposit came out negative and was clamped to zero
    NegativeNetDepositRedemption,
    /// Sub-account NAV below zero, treated as zero for pro-rata shares
    NegativeNav,
}

/// Non-fatal oddity in the input data, recorded on the ledger and reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAnomaly {
    pub kind: AnomalyKind,
    pub account: String,
    pub sub_account: SubAccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying: Option<String>,
    pub detail: String,
}
