//! Testing Utilities
//!
//! In-memory stand-ins for a chain and for a submitter, used by the unit and
//! integration tests of this crate and of the relayer binary.

use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{keccak256, Address, Bytes, LogData, B256};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use async_trait::async_trait;
use eyre::{eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::evm::client::{ChainClient, ReceiptStatus};
use crate::evm::signer::AccountContext;
use crate::evm::submitter::{BridgeCall, SubmissionError, SubmissionOutcome, TxSubmitter};
use crate::types::ChainEndpoint;

/// Endpoint with no real RPC behind it
pub fn mock_endpoint(name: &str, chain_id: u64) -> ChainEndpoint {
    ChainEndpoint {
        name: name.to_string(),
        chain_id,
        rpc_url: "http://127.0.0.1:0".to_string(),
        requires_poa_shim: false,
    }
}

// ============================================================================
// Mock Chain
// ============================================================================

#[derive(Default)]
struct MockChainState {
    head: u64,
    logs: Vec<Log>,
    /// Blocks whose log queries fail, with the number of failures left
    failing_blocks: HashMap<u64, u32>,
    head_failures: u32,
    log_queries: Vec<(u64, u64)>,
    head_queries: usize,
    sent: Vec<Bytes>,
    reverting_selectors: HashSet<[u8; 4]>,
    receipts_available: bool,
}

/// A chain that lives in memory
///
/// Logs are served by block range, transactions are decoded and recorded,
/// and the pending nonce is the number of transactions broadcast so far.
pub struct MockChain {
    endpoint: ChainEndpoint,
    state: Mutex<MockChainState>,
    rpc_delay: Duration,
}

impl MockChain {
    pub fn new(name: &str, chain_id: u64, head: u64) -> Self {
        Self {
            endpoint: mock_endpoint(name, chain_id),
            state: Mutex::new(MockChainState {
                head,
                receipts_available: true,
                ..Default::default()
            }),
            rpc_delay: Duration::ZERO,
        }
    }

    /// Delay every nonce read and broadcast, to widen race windows
    pub fn with_rpc_delay(mut self, delay: Duration) -> Self {
        self.rpc_delay = delay;
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockChainState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_head(&self, head: u64) {
        self.state().head = head;
    }

    /// Make the next `times` head queries fail
    pub fn fail_head(&self, times: u32) {
        self.state().head_failures = times;
    }

    /// Add an event log emitted by `address` at `(block, log_index)`
    pub fn push_log(&self, address: Address, data: LogData, block: u64, log_index: u64) {
        let mut tx_hash = [0u8; 32];
        tx_hash[..8].copy_from_slice(&block.to_be_bytes());
        tx_hash[8..16].copy_from_slice(&log_index.to_be_bytes());
        self.state().logs.push(Log {
            inner: alloy::primitives::Log { address, data },
            block_hash: None,
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(B256::from(tx_hash)),
            transaction_index: Some(0),
            log_index: Some(log_index),
            removed: false,
        });
    }

    /// Add a raw log as is, for malformed-log cases
    pub fn push_raw_log(&self, log: Log) {
        self.state().logs.push(log);
    }

    /// Make log queries touching `block` fail `times` times
    pub fn fail_block(&self, block: u64, times: u32) {
        self.state().failing_blocks.insert(block, times);
    }

    /// Mined receipts report failure for calls with this selector
    pub fn revert_selector(&self, selector: [u8; 4]) {
        self.state().reverting_selectors.insert(selector);
    }

    /// Stop producing receipts
    pub fn withhold_receipts(&self) {
        self.state().receipts_available = false;
    }

    /// Ranges requested through `logs`, in call order
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state().log_queries.clone()
    }

    pub fn head_queries(&self) -> usize {
        self.state().head_queries
    }

    /// Every broadcast transaction, decoded
    pub fn sent_transactions(&self) -> Vec<TxEnvelope> {
        self.state()
            .sent
            .iter()
            .filter_map(|raw| TxEnvelope::decode_2718(&mut raw.as_ref()).ok())
            .collect()
    }

    fn find_sent(&self, tx_hash: B256) -> Option<TxEnvelope> {
        self.state()
            .sent
            .iter()
            .find(|raw| keccak256(raw) == tx_hash)
            .and_then(|raw| TxEnvelope::decode_2718(&mut raw.as_ref()).ok())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn block_number(&self) -> Result<u64> {
        let mut state = self.state();
        state.head_queries += 1;
        if state.head_failures > 0 {
            state.head_failures -= 1;
            return Err(eyre!("connection refused"));
        }
        Ok(state.head)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let from = filter.get_from_block().unwrap_or(0);
        let to = filter.get_to_block().unwrap_or(u64::MAX);

        let mut state = self.state();
        state.log_queries.push((from, to));

        for block in from..=to.min(from.saturating_add(10_000)) {
            if let Some(remaining) = state.failing_blocks.get_mut(&block) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(eyre!("query timeout for block {}", block));
                }
            }
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| {
                let block = log.block_number.unwrap_or_default();
                let topic_ok = log
                    .topics()
                    .first()
                    .map(|t| filter.topics[0].matches(t))
                    .unwrap_or(true);
                block >= from && block <= to && filter.address.matches(&log.address()) && topic_ok
            })
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        Ok(1_700_000_000 + number * 2)
    }

    async fn pending_nonce(&self, _address: Address) -> Result<u64> {
        let nonce = self.state().sent.len() as u64;
        if !self.rpc_delay.is_zero() {
            tokio::time::sleep(self.rpc_delay).await;
        }
        Ok(nonce)
    }

    async fn gas_price(&self) -> Result<u128> {
        Ok(1_000_000_000)
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64> {
        Ok(100_000)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        if !self.rpc_delay.is_zero() {
            tokio::time::sleep(self.rpc_delay).await;
        }
        let hash = keccak256(&raw);
        self.state().sent.push(raw);
        Ok(hash)
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>> {
        if !self.state().receipts_available {
            return Ok(None);
        }
        let Some(tx) = self.find_sent(tx_hash) else {
            return Ok(None);
        };
        let input = tx.input();
        let reverted = input.len() >= 4
            && self
                .state()
                .reverting_selectors
                .contains(&[input[0], input[1], input[2], input[3]]);
        let head = self.state().head;
        Ok(Some(ReceiptStatus {
            success: !reverted,
            block_number: Some(head + 1),
            gas_used: 50_000,
        }))
    }
}

// ============================================================================
// Recording Submitter
// ============================================================================

/// One call seen by a [`RecordingSubmitter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub signer: Address,
    pub call: BridgeCall,
}

/// [`TxSubmitter`] that records calls instead of sending them
pub struct RecordingSubmitter {
    chain_name: String,
    calls: Mutex<Vec<RecordedCall>>,
    /// Error to return, and how many more times (`None` = always)
    failure: Mutex<Option<(SubmissionError, Option<u32>)>>,
}

impl RecordingSubmitter {
    pub fn new(chain_name: &str) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            calls: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Fail every following submission with `error`
    pub fn fail_with(&self, error: SubmissionError) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some((error, None));
    }

    /// Fail the next `times` submissions with `error`, then succeed again
    pub fn fail_next(&self, error: SubmissionError, times: u32) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = Some((error, Some(times)));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl TxSubmitter for RecordingSubmitter {
    fn chain_name(&self) -> &str {
        &self.chain_name
    }

    async fn submit(
        &self,
        ctx: &AccountContext,
        call: &BridgeCall,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        calls.push(RecordedCall {
            signer: ctx.address(),
            call: call.clone(),
        });
        let failure = match self
            .failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_mut()
        {
            Some((error, None)) => Some(error.clone()),
            Some((error, Some(remaining))) if *remaining > 0 => {
                *remaining -= 1;
                Some(error.clone())
            }
            _ => None,
        };
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(SubmissionOutcome::Broadcast {
            tx_hash: keccak256(call.calldata()),
            nonce: calls.len() as u64 - 1,
        })
    }
}
