//! Merkle builder errors

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// No records were supplied
    #[error("can't build a merkle tree with no records")]
    EmptyTree,

    /// Proof requested for a record that is not in the distribution
    #[error("record index {index} out of range ({len} records)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid raw token amount: {0}")]
    InvalidAmount(String),

    /// Token total exceeds uint256 while summarising a distribution
    #[error("token total overflows uint256 for {0}")]
    Overflow(String),
}
