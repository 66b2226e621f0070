//! EVM Chain Support Module
//!
//! Everything that talks to the two bridge chains and the Merkle validator.
//!
//! ## Submodules
//!
//! - `client` - RPC seam ([`ChainClient`]) and its alloy implementation
//! - `contracts` - Bridge and validator bindings using alloy sol! macro
//! - `events` - Deposit / Unwrap log decoding
//! - `scanner` - Block-window resolution and range queries
//! - `signer` - Accounts and EIP-191 challenge signatures
//! - `submitter` - Nonce-serialized transaction submission
//! - `block_order` - Priority-fee ordering check

pub mod block_order;
pub mod client;
pub mod contracts;
pub mod events;
pub mod scanner;
pub mod signer;
pub mod submitter;

// Re-export commonly used items
pub use client::{AlloyChainClient, ChainClient, ReceiptStatus};
pub use contracts::{DestinationBridge, MerkleValidator, SourceBridge};
pub use events::{decode_log, BridgeEvent, BridgeEventKind, DecodeError, DepositEvent, UnwrapEvent};
pub use scanner::{
    BlockRef, EventScanner, PartialFailure, ScanReport, ScanWindow, SubWindowOutcome, WindowError,
};
pub use signer::{
    recover_signer, sign_challenge, verify_challenge, Account, AccountContext, SecretSource,
    SignedChallenge, SignerError,
};
pub use submitter::{
    BridgeCall, EvmSubmitter, NonceLocks, SubmissionConfig, SubmissionError, SubmissionOutcome,
    TxSubmitter,
};
