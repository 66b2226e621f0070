//! Transaction construction, signing and broadcast
//!
//! Every state-changing call goes through [`EvmSubmitter::submit`]:
//!
//! 1. take the `(chain id, signer)` nonce lock
//! 2. read the pending transaction count as nonce and the current gas price
//! 3. estimate gas (or use the configured fixed limit)
//! 4. sign with the caller's [`AccountContext`] and broadcast
//! 5. release the lock, then optionally wait for the receipt
//!
//! A reverted receipt is reported as [`SubmissionOutcome::Reverted`]. Nothing
//! here resubmits; a retry is the caller's decision and takes a fresh nonce.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::evm::client::ChainClient;
use crate::evm::contracts::{DestinationBridge, MerkleValidator, SourceBridge};
use crate::evm::signer::AccountContext;
use crate::types::ContractBinding;

// ============================================================================
// Calls
// ============================================================================

/// A state-changing call on one of the bridge contracts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    /// Destination: mint wrapped tokens for a source Deposit
    Wrap {
        token: Address,
        recipient: Address,
        amount: U256,
    },
    /// Source: release underlying tokens for a destination Unwrap
    Withdraw {
        token: Address,
        recipient: Address,
        amount: U256,
    },
    /// Source: allow deposits of `token`
    Register { token: Address },
    /// Destination: deploy the wrapped counterpart of `underlying`
    CreateWrappedToken {
        underlying: Address,
        name: String,
        symbol: String,
    },
    /// Validator: claim `leaf` with a Merkle inclusion proof
    SubmitProof { proof: Vec<B256>, leaf: B256 },
}

impl BridgeCall {
    /// Solidity function name
    pub fn function_name(&self) -> &'static str {
        match self {
            BridgeCall::Wrap { .. } => "wrap",
            BridgeCall::Withdraw { .. } => "withdraw",
            BridgeCall::Register { .. } => "register",
            BridgeCall::CreateWrappedToken { .. } => "createWrappedToken",
            BridgeCall::SubmitProof { .. } => "submit",
        }
    }

    /// ABI-encoded calldata
    pub fn calldata(&self) -> Bytes {
        let encoded = match self {
            BridgeCall::Wrap {
                token,
                recipient,
                amount,
            } => DestinationBridge::wrapCall {
                _underlying_token: *token,
                _recipient: *recipient,
                _amount: *amount,
            }
            .abi_encode(),
            BridgeCall::Withdraw {
                token,
                recipient,
                amount,
            } => SourceBridge::withdrawCall {
                _token: *token,
                _recipient: *recipient,
                _amount: *amount,
            }
            .abi_encode(),
            BridgeCall::Register { token } => SourceBridge::registerCall { _token: *token }.abi_encode(),
            BridgeCall::CreateWrappedToken {
                underlying,
                name,
                symbol,
            } => DestinationBridge::createWrappedTokenCall {
                _underlying_token: *underlying,
                name: name.clone(),
                symbol: symbol.clone(),
            }
            .abi_encode(),
            BridgeCall::SubmitProof { proof, leaf } => MerkleValidator::submitCall {
                proof: proof.clone(),
                leaf: *leaf,
            }
            .abi_encode(),
        };
        encoded.into()
    }
}

impl fmt::Display for BridgeCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeCall::Wrap {
                token,
                recipient,
                amount,
            }
            | BridgeCall::Withdraw {
                token,
                recipient,
                amount,
            } => write!(
                f,
                "{}(token={}, recipient={}, amount={})",
                self.function_name(),
                token,
                recipient,
                amount
            ),
            BridgeCall::Register { token } => write!(f, "register(token={})", token),
            BridgeCall::CreateWrappedToken {
                underlying, symbol, ..
            } => write!(f, "createWrappedToken(underlying={}, symbol={})", underlying, symbol),
            BridgeCall::SubmitProof { proof, leaf } => {
                write!(f, "submit(leaf={}, proof_len={})", leaf, proof.len())
            }
        }
    }
}

// ============================================================================
// Outcomes and Errors
// ============================================================================

/// What happened to a broadcast transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Broadcast, receipt not requested
    Broadcast { tx_hash: B256, nonce: u64 },
    /// Mined with success status
    Confirmed {
        tx_hash: B256,
        nonce: u64,
        block_number: Option<u64>,
        gas_used: u64,
    },
    /// Mined with failure status; not retried
    Reverted {
        tx_hash: B256,
        nonce: u64,
        block_number: Option<u64>,
    },
    /// Broadcast but no receipt before the timeout
    Unconfirmed { tx_hash: B256, nonce: u64 },
}

impl SubmissionOutcome {
    pub fn tx_hash(&self) -> B256 {
        match self {
            SubmissionOutcome::Broadcast { tx_hash, .. }
            | SubmissionOutcome::Confirmed { tx_hash, .. }
            | SubmissionOutcome::Reverted { tx_hash, .. }
            | SubmissionOutcome::Unconfirmed { tx_hash, .. } => *tx_hash,
        }
    }

    /// Label used in logs and metrics
    pub fn status(&self) -> &'static str {
        match self {
            SubmissionOutcome::Broadcast { .. } => "broadcast",
            SubmissionOutcome::Confirmed { .. } => "confirmed",
            SubmissionOutcome::Reverted { .. } => "reverted",
            SubmissionOutcome::Unconfirmed { .. } => "unconfirmed",
        }
    }

    pub fn is_reverted(&self) -> bool {
        matches!(self, SubmissionOutcome::Reverted { .. })
    }
}

/// Failures that happen before a transaction leaves the process
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("rpc error while preparing {function}: {reason}")]
    Rpc { function: String, reason: String },

    #[error("failed to sign {function}: {reason}")]
    Signing { function: String, reason: String },

    #[error("broadcast of {function} rejected: {reason}")]
    Broadcast { function: String, reason: String },
}

impl SubmissionError {
    /// An RPC read failed before signing; nothing reached the chain
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmissionError::Rpc { .. })
    }
}

// ============================================================================
// Nonce Serialization
// ============================================================================

/// One async mutex per `(chain id, signer address)`
///
/// Every submitter for the same chain and account must share one registry so
/// that nonce reads and broadcasts never interleave.
#[derive(Debug, Default)]
pub struct NonceLocks {
    locks: Mutex<HashMap<(u64, Address), Arc<tokio::sync::Mutex<()>>>>,
}

impl NonceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `address` on `chain_id`
    pub fn lock_for(&self, chain_id: u64, address: Address) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry((chain_id, address))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

// ============================================================================
// Submitter
// ============================================================================

/// Submission policy
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Fixed gas limit; `None` estimates per call
    pub gas_limit: Option<u64>,
    /// Block until a receipt is observed
    pub wait_for_receipt: bool,
    /// How long to wait for a receipt
    pub receipt_timeout: Duration,
    /// Receipt polling interval
    pub receipt_poll_interval: Duration,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            gas_limit: None,
            wait_for_receipt: true,
            receipt_timeout: Duration::from_secs(120),
            receipt_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Anything that can execute a [`BridgeCall`] on behalf of an account
#[async_trait]
pub trait TxSubmitter: Send + Sync {
    /// Name of the chain calls land on
    fn chain_name(&self) -> &str;

    /// Build, sign and broadcast `call`
    async fn submit(
        &self,
        ctx: &AccountContext,
        call: &BridgeCall,
    ) -> Result<SubmissionOutcome, SubmissionError>;
}

/// [`TxSubmitter`] for one contract on one EVM chain
pub struct EvmSubmitter {
    client: Arc<dyn ChainClient>,
    binding: ContractBinding,
    locks: Arc<NonceLocks>,
    config: SubmissionConfig,
}

impl EvmSubmitter {
    pub fn new(
        client: Arc<dyn ChainClient>,
        binding: ContractBinding,
        locks: Arc<NonceLocks>,
        config: SubmissionConfig,
    ) -> Self {
        Self {
            client,
            binding,
            locks,
            config,
        }
    }

    pub fn binding(&self) -> &ContractBinding {
        &self.binding
    }

    /// Nonce read through broadcast; runs under the nonce lock
    async fn sign_and_broadcast(
        &self,
        ctx: &AccountContext,
        call: &BridgeCall,
    ) -> Result<(B256, u64), SubmissionError> {
        let function = call.function_name().to_string();
        let rpc_err = |e: eyre::Report| SubmissionError::Rpc {
            function: function.clone(),
            reason: format!("{:#}", e),
        };

        let from = ctx.address();
        let nonce = self.client.pending_nonce(from).await.map_err(rpc_err)?;
        let gas_price = self.client.gas_price().await.map_err(rpc_err)?;

        let tx = TransactionRequest::default()
            .with_from(from)
            .with_to(self.binding.address)
            .with_input(call.calldata())
            .with_nonce(nonce)
            .with_chain_id(self.binding.chain_id)
            .with_gas_price(gas_price);

        let gas_limit = match self.config.gas_limit {
            Some(limit) => limit,
            None => self.client.estimate_gas(&tx).await.map_err(rpc_err)?,
        };
        let tx = tx.with_gas_limit(gas_limit);

        let envelope = tx
            .build(&ctx.account().wallet())
            .await
            .map_err(|e| SubmissionError::Signing {
                function: function.clone(),
                reason: e.to_string(),
            })?;
        let raw: Bytes = envelope.encoded_2718().into();

        debug!(
            chain = %self.binding.chain_name,
            function = %function,
            nonce,
            gas_price,
            gas_limit,
            "Broadcasting transaction"
        );

        let tx_hash = self
            .client
            .send_raw_transaction(raw)
            .await
            .map_err(|e| SubmissionError::Broadcast {
                function: function.clone(),
                reason: format!("{:#}", e),
            })?;

        Ok((tx_hash, nonce))
    }

    /// Poll for the receipt until it appears or the timeout elapses
    async fn await_receipt(&self, tx_hash: B256, nonce: u64) -> SubmissionOutcome {
        let start = tokio::time::Instant::now();

        while start.elapsed() < self.config.receipt_timeout {
            match self.client.receipt(tx_hash).await {
                Ok(Some(receipt)) if receipt.success => {
                    return SubmissionOutcome::Confirmed {
                        tx_hash,
                        nonce,
                        block_number: receipt.block_number,
                        gas_used: receipt.gas_used,
                    }
                }
                Ok(Some(receipt)) => {
                    return SubmissionOutcome::Reverted {
                        tx_hash,
                        nonce,
                        block_number: receipt.block_number,
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = %tx_hash, error = %e, "Receipt poll failed, will retry");
                }
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }

        SubmissionOutcome::Unconfirmed { tx_hash, nonce }
    }
}

#[async_trait]
impl TxSubmitter for EvmSubmitter {
    fn chain_name(&self) -> &str {
        &self.binding.chain_name
    }

    async fn submit(
        &self,
        ctx: &AccountContext,
        call: &BridgeCall,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let lock = self.locks.lock_for(self.binding.chain_id, ctx.address());
        let (tx_hash, nonce) = {
            let _guard = lock.lock().await;
            self.sign_and_broadcast(ctx, call).await?
        };

        info!(
            chain = %self.binding.chain_name,
            call = %call,
            tx_hash = %tx_hash,
            nonce,
            "Transaction broadcast"
        );

        if !self.config.wait_for_receipt {
            return Ok(SubmissionOutcome::Broadcast { tx_hash, nonce });
        }

        let outcome = self.await_receipt(tx_hash, nonce).await;
        match &outcome {
            SubmissionOutcome::Reverted { .. } => warn!(
                chain = %self.binding.chain_name,
                call = %call,
                tx_hash = %tx_hash,
                "Transaction reverted; not resubmitting"
            ),
            SubmissionOutcome::Unconfirmed { .. } => warn!(
                chain = %self.binding.chain_name,
                tx_hash = %tx_hash,
                timeout_secs = self.config.receipt_timeout.as_secs(),
                "No receipt before timeout"
            ),
            _ => {}
        }
        Ok(outcome)
    }
}
