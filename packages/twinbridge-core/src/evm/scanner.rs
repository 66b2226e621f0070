//! Block-range event scanning
//!
//! A scan resolves a pair of block references to a concrete inclusive window,
//! splits it into range queries and decodes every matching log. Each
//! sub-window reports its own outcome, so a failed range query is visible to
//! the caller instead of silently dropping events.

use alloy::rpc::types::Filter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::evm::client::ChainClient;
use crate::evm::events::{decode_log, BridgeEvent, BridgeEventKind, DecodeError};
use crate::types::ContractBinding;

/// Windows at most this long are fetched with a single range query
pub const DEFAULT_RANGE_QUERY_LIMIT: u64 = 30;

// ============================================================================
// Windows
// ============================================================================

/// A block bound as given by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    /// Current chain head at resolution time
    Latest,
    /// Explicit height; negative values clamp to 0
    Number(i64),
}

impl FromStr for BlockRef {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(BlockRef::Latest);
        }
        s.trim()
            .parse::<i64>()
            .map(BlockRef::Number)
            .map_err(|_| WindowError::InvalidBlockRef(s.to_string()))
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Latest => f.write_str("latest"),
            BlockRef::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("invalid scan window on {chain}: end block {end} is before start block {start}")]
    InvalidWindow { chain: String, start: u64, end: u64 },

    #[error("invalid block reference '{0}': expected 'latest' or an integer")]
    InvalidBlockRef(String),

    #[error("could not resolve chain head on {chain}: {reason}")]
    HeadUnavailable { chain: String, reason: String },

    #[error("invalid scan window on {chain}: end block {end} is past the chain head {head}")]
    BeyondHead { chain: String, end: u64, head: u64 },
}

/// Inclusive block range on one chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanWindow {
    pub chain: String,
    pub start_block: u64,
    pub end_block: u64,
}

impl ScanWindow {
    pub fn new(chain: &str, start_block: u64, end_block: u64) -> Result<Self, WindowError> {
        if end_block < start_block {
            return Err(WindowError::InvalidWindow {
                chain: chain.to_string(),
                start: start_block,
                end: end_block,
            });
        }
        Ok(Self {
            chain: chain.to_string(),
            start_block,
            end_block,
        })
    }

    /// Number of blocks covered
    pub fn block_count(&self) -> u64 {
        (self.end_block - self.start_block).saturating_add(1)
    }

    /// Query plan: the window itself when it fits in `limit`, otherwise one
    /// window per block. Sub-windows are produced lazily.
    pub fn split(&self, limit: u64) -> impl Iterator<Item = ScanWindow> + '_ {
        let step = if self.block_count() <= limit {
            self.block_count()
        } else {
            1
        };
        (self.start_block..=self.end_block)
            .step_by(usize::try_from(step).unwrap_or(usize::MAX))
            .map(move |start_block| ScanWindow {
                chain: self.chain.clone(),
                start_block,
                end_block: start_block.saturating_add(step - 1).min(self.end_block),
            })
    }
}

impl fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..={}]", self.chain, self.start_block, self.end_block)
    }
}

/// Resolve one bound against a known head
pub fn resolve_bound(bound: BlockRef, head: u64) -> u64 {
    match bound {
        BlockRef::Latest => head,
        BlockRef::Number(n) => n.max(0) as u64,
    }
}

// ============================================================================
// Scan Results
// ============================================================================

/// Result of one range query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubWindowOutcome {
    /// Query succeeded; events sorted by position
    Ok(Vec<BridgeEvent>),
    /// Query failed and may be retried
    Retryable(String),
}

/// A sub-window whose events are unknown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialFailure {
    pub window: ScanWindow,
    pub reason: String,
}

/// A log that matched the filter but could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLog {
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub error: DecodeError,
}

/// Everything one scan observed
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub window: ScanWindow,
    pub kind: BridgeEventKind,
    /// Sub-windows in ascending block order
    pub outcomes: Vec<(ScanWindow, SubWindowOutcome)>,
    pub skipped: Vec<SkippedLog>,
}

impl ScanReport {
    /// Decoded events of all successful sub-windows in (block, log index) order
    pub fn events(&self) -> Vec<BridgeEvent> {
        let mut events: Vec<BridgeEvent> = self
            .outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                SubWindowOutcome::Ok(events) => Some(events.iter().cloned()),
                SubWindowOutcome::Retryable(_) => None,
            })
            .flatten()
            .collect();
        events.sort_by_key(BridgeEvent::position);
        events
    }

    /// Sub-windows that must be rescanned
    pub fn failures(&self) -> Vec<PartialFailure> {
        self.outcomes
            .iter()
            .filter_map(|(window, outcome)| match outcome {
                SubWindowOutcome::Retryable(reason) => Some(PartialFailure {
                    window: window.clone(),
                    reason: reason.clone(),
                }),
                SubWindowOutcome::Ok(_) => None,
            })
            .collect()
    }

    /// True when every sub-window was fetched
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, SubWindowOutcome::Ok(_)))
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Scans one contract on one chain for bridge events
pub struct EventScanner {
    client: Arc<dyn ChainClient>,
    binding: ContractBinding,
    range_query_limit: u64,
}

impl EventScanner {
    pub fn new(client: Arc<dyn ChainClient>, binding: ContractBinding) -> Self {
        Self {
            client,
            binding,
            range_query_limit: DEFAULT_RANGE_QUERY_LIMIT,
        }
    }

    /// Override the single-query window size
    pub fn with_range_query_limit(mut self, limit: u64) -> Self {
        self.range_query_limit = limit.max(1);
        self
    }

    pub fn chain_name(&self) -> &str {
        &self.binding.chain_name
    }

    /// Current head of the scanned chain
    pub async fn head(&self) -> Result<u64, WindowError> {
        self.client
            .block_number()
            .await
            .map_err(|e| WindowError::HeadUnavailable {
                chain: self.binding.chain_name.clone(),
                reason: format!("{:#}", e),
            })
    }

    /// Turn caller bounds into a concrete window
    ///
    /// Each `Latest` bound queries the head on its own, so with both bounds
    /// set to `Latest` the end can land past the start. An explicit end past
    /// the head is rejected.
    pub async fn resolve_window(&self, start: BlockRef, end: BlockRef) -> Result<ScanWindow, WindowError> {
        let start_block = match start {
            BlockRef::Latest => self.head().await?,
            other => resolve_bound(other, 0),
        };
        let end_block = match end {
            BlockRef::Latest => self.head().await?,
            other => {
                let end_block = resolve_bound(other, 0);
                let head = self.head().await?;
                if end_block > head {
                    return Err(WindowError::BeyondHead {
                        chain: self.binding.chain_name.clone(),
                        end: end_block,
                        head,
                    });
                }
                end_block
            }
        };
        ScanWindow::new(&self.binding.chain_name, start_block, end_block)
    }

    /// Resolve and scan in one step
    pub async fn scan(
        &self,
        kind: BridgeEventKind,
        start: BlockRef,
        end: BlockRef,
    ) -> Result<ScanReport, WindowError> {
        let window = self.resolve_window(start, end).await?;
        Ok(self.scan_window(kind, &window).await)
    }

    /// Scan an already resolved window
    pub async fn scan_window(&self, kind: BridgeEventKind, window: &ScanWindow) -> ScanReport {
        let mut outcomes = Vec::new();
        let mut skipped = Vec::new();

        for sub_window in window.split(self.range_query_limit) {
            let outcome = self.query(kind, &sub_window, &mut skipped).await;
            outcomes.push((sub_window, outcome));
        }

        let report = ScanReport {
            window: window.clone(),
            kind,
            outcomes,
            skipped,
        };
        debug!(
            window = %window,
            kind = %kind,
            sub_windows = report.outcomes.len(),
            failures = report.failures().len(),
            "Scan finished"
        );
        report
    }

    async fn query(
        &self,
        kind: BridgeEventKind,
        window: &ScanWindow,
        skipped: &mut Vec<SkippedLog>,
    ) -> SubWindowOutcome {
        let filter = Filter::new()
            .address(self.binding.address)
            .event_signature(kind.signature_hash())
            .from_block(window.start_block)
            .to_block(window.end_block);

        let logs = match self.client.logs(&filter).await {
            Ok(logs) => logs,
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(window = %window, kind = %kind, error = %reason, "Range query failed");
                return SubWindowOutcome::Retryable(reason);
            }
        };

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match decode_log(kind, log) {
                Ok(event) => events.push(event),
                Err(error) => {
                    warn!(
                        window = %window,
                        block = ?log.block_number,
                        log_index = ?log.log_index,
                        error = %error,
                        "Skipping undecodable log"
                    );
                    skipped.push(SkippedLog {
                        block_number: log.block_number,
                        log_index: log.log_index,
                        error,
                    });
                }
            }
        }
        events.sort_by_key(BridgeEvent::position);
        SubWindowOutcome::Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::contracts::SourceBridge;
    use crate::testing::MockChain;
    use alloy::json_abi::JsonAbi;
    use alloy::primitives::{Address, U256};
    use alloy::sol_types::SolEvent;

    const CONTRACT: &str = "0x00000000000000000000000000000000000000c1";

    fn scanner(chain: Arc<MockChain>) -> EventScanner {
        let binding = ContractBinding::new("avax", 43113, CONTRACT, JsonAbi::default()).unwrap();
        EventScanner::new(chain, binding)
    }

    fn deposit(amount: u64) -> alloy::primitives::LogData {
        SourceBridge::Deposit {
            token: Address::repeat_byte(1),
            recipient: Address::repeat_byte(2),
            amount: U256::from(amount),
        }
        .encode_log_data()
    }

    fn contract() -> Address {
        CONTRACT.parse().unwrap()
    }

    #[test]
    fn test_block_ref_parse() {
        assert_eq!("latest".parse::<BlockRef>().unwrap(), BlockRef::Latest);
        assert_eq!("-3".parse::<BlockRef>().unwrap(), BlockRef::Number(-3));
        assert!("tip".parse::<BlockRef>().is_err());
    }

    #[test]
    fn test_split_policy() {
        let short = ScanWindow::new("avax", 10, 39).unwrap();
        assert_eq!(short.split(30).collect::<Vec<_>>(), vec![short.clone()]);

        let long = ScanWindow::new("avax", 10, 40).unwrap();
        let parts: Vec<_> = long.split(30).collect();
        assert_eq!(parts.len(), 31);
        assert!(parts.iter().all(|w| w.block_count() == 1));
        assert_eq!(parts[0].start_block, 10);
        assert_eq!(parts[30].end_block, 40);
    }

    #[tokio::test]
    async fn test_negative_start_clamps_to_zero() {
        let chain = Arc::new(MockChain::new("avax", 43113, 100));
        let scanner = scanner(chain);
        let clamped = scanner
            .resolve_window(BlockRef::Number(-3), BlockRef::Number(10))
            .await
            .unwrap();
        let explicit = scanner
            .resolve_window(BlockRef::Number(0), BlockRef::Number(10))
            .await
            .unwrap();
        assert_eq!(clamped, explicit);
        assert_eq!((clamped.start_block, clamped.end_block), (0, 10));
    }

    #[tokio::test]
    async fn test_end_before_start_rejected() {
        let chain = Arc::new(MockChain::new("avax", 43113, 100));
        let err = scanner(chain)
            .resolve_window(BlockRef::Number(50), BlockRef::Number(40))
            .await
            .unwrap_err();
        assert!(matches!(err, WindowError::InvalidWindow { start: 50, end: 40, .. }));
    }

    #[tokio::test]
    async fn test_latest_resolves_each_bound() {
        let chain = Arc::new(MockChain::new("avax", 43113, 77));
        let scanner = scanner(chain.clone());
        let window = scanner
            .resolve_window(BlockRef::Latest, BlockRef::Latest)
            .await
            .unwrap();
        assert_eq!((window.start_block, window.end_block), (77, 77));
        assert_eq!(chain.head_queries(), 2);
    }

    #[tokio::test]
    async fn test_head_failure_surfaces() {
        let chain = Arc::new(MockChain::new("avax", 43113, 77));
        chain.fail_head(1);
        let err = scanner(chain)
            .resolve_window(BlockRef::Number(1), BlockRef::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, WindowError::HeadUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_events_ordered_and_filtered_by_window() {
        let chain = Arc::new(MockChain::new("avax", 43113, 100));
        chain.push_log(contract(), deposit(3), 12, 1);
        chain.push_log(contract(), deposit(1), 10, 5);
        chain.push_log(contract(), deposit(2), 12, 0);
        chain.push_log(contract(), deposit(9), 30, 0);

        let report = scanner(chain.clone())
            .scan(BridgeEventKind::Deposit, BlockRef::Number(10), BlockRef::Number(20))
            .await
            .unwrap();

        assert!(report.is_complete());
        let positions: Vec<_> = report.events().iter().map(BridgeEvent::position).collect();
        assert_eq!(positions, vec![(10, 5), (12, 0), (12, 1)]);
        assert_eq!(chain.log_queries(), vec![(10, 20)]);
    }

    #[tokio::test]
    async fn test_failed_sub_window_reported() {
        let chain = Arc::new(MockChain::new("avax", 43113, 200));
        chain.push_log(contract(), deposit(1), 100, 0);
        chain.push_log(contract(), deposit(2), 120, 0);
        chain.fail_block(110, 1);

        let report = scanner(chain)
            .scan(BridgeEventKind::Deposit, BlockRef::Number(100), BlockRef::Number(140))
            .await
            .unwrap();

        assert!(!report.is_complete());
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].window.start_block, 110);
        assert_eq!(failures[0].window.end_block, 110);
        assert_eq!(report.events().len(), 2);
    }

    #[test]
    fn test_split_is_lazy_for_huge_windows() {
        let huge = ScanWindow::new("avax", 0, u64::MAX).unwrap();
        assert_eq!(huge.block_count(), u64::MAX);
        let first: Vec<_> = huge.split(30).take(3).collect();
        assert_eq!(first.len(), 3);
        assert_eq!((first[2].start_block, first[2].end_block), (2, 2));
    }

    #[tokio::test]
    async fn test_end_past_head_rejected_without_queries() {
        let chain = Arc::new(MockChain::new("avax", 43113, 100));
        let err = scanner(chain.clone())
            .scan(BridgeEventKind::Deposit, BlockRef::Number(0), BlockRef::Number(i64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WindowError::BeyondHead { end, head: 100, .. } if end == i64::MAX as u64
        ));
        assert!(chain.log_queries().is_empty());
    }

    #[tokio::test]
    async fn test_end_at_head_accepted() {
        let chain = Arc::new(MockChain::new("avax", 43113, 100));
        let window = scanner(chain)
            .resolve_window(BlockRef::Number(60), BlockRef::Number(100))
            .await
            .unwrap();
        assert_eq!(window.block_count(), 41);
    }

    #[tokio::test]
    async fn test_other_contract_logs_ignored() {
        let chain = Arc::new(MockChain::new("avax", 43113, 100));
        chain.push_log(Address::repeat_byte(0xee), deposit(1), 5, 0);
        let report = scanner(chain)
            .scan(BridgeEventKind::Deposit, BlockRef::Number(0), BlockRef::Number(10))
            .await
            .unwrap();
        assert!(report.events().is_empty());
    }
}
