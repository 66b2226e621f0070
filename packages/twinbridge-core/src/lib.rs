//! Twinbridge Core: relay library for a two-chain lock/wrap token bridge
//!
//! This crate holds everything the relayer binary does, minus process
//! plumbing:
//!
//! - **Hash / Merkle** - Keccak-256, canonical pair hashing, tree build and proofs
//! - **Types** - Chain endpoints and contract bindings loaded from contract info
//! - **EVM Module** - Chain client, event scanning, signing and submission
//! - **Dispatcher** - Deposit -> wrap and Unwrap -> withdraw mapping
//! - **Identity** - File-backed pool of relay keys
//! - **Event Log** - CSV record of relayed deposits
//!
//! ## Feature Flags
//!
//! - `testing` - In-memory chain and submitter for tests

pub mod dispatcher;
pub mod event_log;
pub mod evm;
pub mod hash;
pub mod identity;
pub mod merkle;
pub mod redact;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used items at the crate root
pub use dispatcher::{counter_action, DispatchRecord, RelayDispatcher};
pub use event_log::{DepositLog, DepositRow};
pub use hash::{bytes32_to_hex, canonical_pair_hash, keccak256, parse_bytes32, u64_to_bytes32, Bytes32};
pub use identity::{IdentityAllocator, IdentityError};
pub use merkle::{generate_primes, leaves_from_u64, verify_proof, MerkleError, MerkleProof, MerkleTree};
pub use redact::Redacted;
pub use types::{BindingError, ChainEndpoint, ChainSide, ContractBinding, ContractInfoFile};
