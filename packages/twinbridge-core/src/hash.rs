//! Hash computation for Merkle commitments
//!
//! This module provides the Keccak-256 primitive and the canonical pair hash
//! used by the tree builder, the proof verifier and the on-chain validator
//! (OpenZeppelin `MerkleProof` sorts each pair before hashing).

use tiny_keccak::{Hasher, Keccak};

/// A 32-byte hash or leaf value
pub type Bytes32 = [u8; 32];

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> Bytes32 {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Hash two sibling values in canonical order
///
/// Equivalent to Solidity's `keccak256(abi.encodePacked(min(a, b), max(a, b)))`.
/// Arrays compare lexicographically, which for big-endian 32-byte words is the
/// same as comparing them as `uint256`.
pub fn canonical_pair_hash(a: &Bytes32, b: &Bytes32) -> Bytes32 {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };

    let mut hasher = Keccak::v256();
    hasher.update(first);
    hasher.update(second);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Encode an integer as a 32-byte big-endian word (Solidity `uint256`)
pub fn u64_to_bytes32(value: u64) -> Bytes32 {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Convert 32-byte array to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &Bytes32) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parse a 0x-prefixed (or bare) 64 character hex string into 32 bytes
pub fn parse_bytes32(s: &str) -> Option<Bytes32> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    if raw.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(raw, &mut out).ok()?;
    Some(out)
}
