//! Sorted-pair merkle tree over claim record leaves

use alloy_primitives::{keccak256, B256};

use crate::error::MerkleError;
use crate::record::ClaimRecord;

/// Hash two nodes in ascending byte order
pub fn hash_pair(a: &B256, b: &B256) -> B256 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo.as_slice());
    buf[32..].copy_from_slice(hi.as_slice());
    keccak256(buf)
}

fn next_level(level: &[B256]) -> Vec<B256> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            // odd node at the end of the level is promoted as is
            _ => pair[0],
        })
        .collect()
}

/// Fully materialized tree
///
/// `levels[0]` holds the sorted leaves, the last level holds the root.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Leaf of each record, in input order
    leaves: Vec<B256>,
    levels: Vec<Vec<B256>>,
}

impl MerkleTree {
    pub fn new(records: &[ClaimRecord]) -> Result<Self, MerkleError> {
        if records.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let leaves: Vec<B256> = records.iter().map(ClaimRecord::leaf).collect();

        let mut sorted = leaves.clone();
        sorted.sort();

        let mut levels = vec![sorted];
        while levels[levels.len() - 1].len() > 1 {
            let next = next_level(&levels[levels.len() - 1]);
            levels.push(next);
        }

        Ok(Self { leaves, levels })
    }

    pub fn root(&self) -> B256 {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Leaf digest of the record at `index` (input order)
    pub fn leaf(&self, index: usize) -> Result<B256, MerkleError> {
        self.leaves
            .get(index)
            .copied()
            .ok_or(MerkleError::IndexOutOfRange { index, len: self.leaves.len() })
    }

    /// Inclusion proof for the record at `index` (input order)
    ///
    /// Levels where the node is an unpaired, carried-up odd node contribute no sibling.
    pub fn proof(&self, index: usize) -> Result<Vec<B256>, MerkleError> {
        let leaf = self.leaf(index)?;

        // Identical records produce identical leaves, any of their positions proves inclusion
        let mut pos = self.levels[0].binary_search(&leaf).unwrap_or_else(|at| at);

        let mut witnesses = Vec::with_capacity(self.levels.len());
        for level in &self.levels[..self.levels.len() - 1] {
            if pos % 2 == 0 {
                if pos + 1 < level.len() {
                    witnesses.push(level[pos + 1]);
                }
            } else {
                witnesses.push(level[pos - 1]);
            }
            pos /= 2;
        }

        Ok(witnesses)
    }
}

/// Root of the tree over `records`
pub fn root(records: &[ClaimRecord]) -> Result<B256, MerkleError> {
    Ok(MerkleTree::new(records)?.root())
}

/// Inclusion proof for `records[index]`
pub fn proof(records: &[ClaimRecord], index: usize) -> Result<Vec<B256>, MerkleError> {
    MerkleTree::new(records)?.proof(index)
}

/// Recompute the root from a leaf and its proof
pub fn verify(leaf: B256, proof: &[B256], root: B256) -> bool {
    proof.iter().fold(leaf, |node, sibling| hash_pair(&node, sibling)) == root
}
