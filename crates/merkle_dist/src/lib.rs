//! Merkle commitment for final claim distributions
//!
//! Every claim record `(index, account, [(token, amount), ...])` is ABI-encoded as
//! `(uint256, address, (address,uint256)[])` and hashed with keccak256. The leaf digests
//! are sorted before the tree is built, and every internal node hashes its two children
//! in ascending order, so proofs verify without any left/right flags and the root does not
//! depend on the order records were supplied in.
//!
//! Odd nodes at the end of a level are carried up unchanged.

#![forbid(unsafe_code)]

pub mod error;
pub mod record;
pub mod tree;

pub use error::MerkleError;
pub use record::{summary, ClaimRecord, TokenAmount};
pub use tree::{hash_pair, proof, root, verify, MerkleTree};

pub use alloy_primitives::{Address, B256, U256};
