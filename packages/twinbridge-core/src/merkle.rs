//! Merkle tree construction, inclusion proofs and verification
//!
//! Trees are built bottom-up over an ordered leaf set with strict binary pairing
//! at every layer, so the leaf count must be a power of two. Sibling pairs are
//! combined with [`canonical_pair_hash`], which is what the external validator
//! contract expects.
//!
//! ```ignore
//! let leaves = leaves_from_u64(&generate_primes(8192));
//! let tree = MerkleTree::build(leaves)?;
//! let proof = tree.proof(3)?;
//! assert!(proof.verify(&tree.root(), tree.leaf(3).unwrap()));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{bytes32_to_hex, canonical_pair_hash, u64_to_bytes32, Bytes32};

/// Errors raised while building a tree or deriving a proof
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// Leaf count is zero or not a power of two
    #[error("invalid tree size: {leaf_count} leaves (must be a non-zero power of two)")]
    InvalidTreeSize { leaf_count: usize },

    /// Proof requested for a leaf that does not exist
    #[error("leaf index {index} out of range for {leaf_count} leaves")]
    LeafIndexOutOfRange { index: usize, leaf_count: usize },
}

/// Binary Merkle tree stored as its full list of layers
///
/// `layers[0]` holds the leaves in input order, the last layer holds the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    layers: Vec<Vec<Bytes32>>,
}

impl MerkleTree {
    /// Build a tree over `leaves`, preserving their order
    pub fn build(leaves: Vec<Bytes32>) -> Result<Self, MerkleError> {
        let leaf_count = leaves.len();
        if !leaf_count.is_power_of_two() {
            return Err(MerkleError::InvalidTreeSize { leaf_count });
        }

        let mut layers = Vec::with_capacity(leaf_count.trailing_zeros() as usize + 1);
        layers.push(leaves);

        while let Some(current) = layers.last().filter(|layer| layer.len() > 1) {
            let next: Vec<Bytes32> = current
                .chunks_exact(2)
                .map(|pair| canonical_pair_hash(&pair[0], &pair[1]))
                .collect();
            layers.push(next);
        }

        Ok(Self { layers })
    }

    /// The root hash
    pub fn root(&self) -> Bytes32 {
        // build() guarantees at least one layer with exactly one element at the top
        self.layers[self.layers.len() - 1][0]
    }

    /// Number of layers, leaves and root included
    pub fn height(&self) -> usize {
        self.layers.len()
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.layers[0].len()
    }

    /// Leaf at `index`, if present
    pub fn leaf(&self, index: usize) -> Option<&Bytes32> {
        self.layers[0].get(index)
    }

    /// All layers, leaf layer first
    pub fn layers(&self) -> &[Vec<Bytes32>] {
        &self.layers
    }

    /// Derive the inclusion proof for the leaf at `index`
    ///
    /// Siblings are ordered leaf layer first, so the proof has `height() - 1`
    /// elements.
    pub fn proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(MerkleError::LeafIndexOutOfRange { index, leaf_count });
        }

        let mut siblings = Vec::with_capacity(self.height() - 1);
        let mut current = index;

        for layer in &self.layers[..self.layers.len() - 1] {
            siblings.push(layer[current ^ 1]);
            current /= 2;
        }

        Ok(MerkleProof {
            leaf_index: index,
            siblings,
        })
    }
}

/// Inclusion proof for a single leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the proven leaf in the leaf layer
    pub leaf_index: usize,
    /// Sibling hashes, leaf layer first
    pub siblings: Vec<Bytes32>,
}

impl MerkleProof {
    /// Check this proof for `leaf` against `root`
    pub fn verify(&self, root: &Bytes32, leaf: &Bytes32) -> bool {
        verify_proof(root, leaf, &self.siblings)
    }

    /// Siblings rendered as 0x-prefixed hex, for logging
    pub fn to_hex(&self) -> Vec<String> {
        self.siblings.iter().map(bytes32_to_hex).collect()
    }
}

/// Recompute the root from `leaf` and `proof` and compare against `root`
///
/// Mirrors OpenZeppelin's `MerkleProof.verify`: the position of the leaf is not
/// needed because every pair is hashed in sorted order.
pub fn verify_proof(root: &Bytes32, leaf: &Bytes32, proof: &[Bytes32]) -> bool {
    let computed = proof
        .iter()
        .fold(*leaf, |acc, sibling| canonical_pair_hash(&acc, sibling));
    computed == *root
}

// ============================================================================
// Leaf Sets
// ============================================================================

/// The first `count` prime numbers in ascending order
pub fn generate_primes(count: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(count);
    let mut candidate = 2u64;

    while primes.len() < count {
        let is_prime = primes
            .iter()
            .take_while(|p| **p * **p <= candidate)
            .all(|p| candidate % p != 0);
        if is_prime {
            primes.push(candidate);
        }
        candidate += 1;
    }

    primes
}

/// Encode integers as 32-byte big-endian leaves, preserving order
pub fn leaves_from_u64(values: &[u64]) -> Vec<Bytes32> {
    values.iter().copied().map(u64_to_bytes32).collect()
}
