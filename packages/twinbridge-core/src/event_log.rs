//! Append-only CSV record of relayed deposits
//!
//! Columns: `blockNumber,timestamp,transactionHash,token,recipient,amount`.
//! Timestamps are ISO-8601 UTC. The header is written when the file is created.

use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{eyre, Result, WrapErr};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::evm::client::ChainClient;
use crate::evm::events::{BridgeEvent, DepositEvent};

pub const DEPOSIT_LOG_HEADER: &str = "blockNumber,timestamp,transactionHash,token,recipient,amount";

/// One CSV line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRow {
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub deposit: DepositEvent,
}

impl DepositRow {
    pub fn new(deposit: &DepositEvent, unix_timestamp: u64) -> Result<Self> {
        let timestamp = DateTime::<Utc>::from_timestamp(unix_timestamp as i64, 0)
            .ok_or_else(|| eyre!("Block timestamp {} out of range", unix_timestamp))?;
        Ok(Self {
            block_number: deposit.block_number,
            timestamp,
            deposit: deposit.clone(),
        })
    }

    pub fn to_csv(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.block_number,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.deposit.tx_hash,
            self.deposit.token,
            self.deposit.recipient,
            self.deposit.amount
        )
    }
}

/// CSV file of deposits
#[derive(Debug, Clone)]
pub struct DepositLog {
    path: PathBuf,
}

impl DepositLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append rows, writing the header first if the file is new
    pub fn append(&self, rows: &[DepositRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .wrap_err_with(|| format!("Failed to open {}", self.path.display()))?;

        let mut buf = String::new();
        if is_new {
            buf.push_str(DEPOSIT_LOG_HEADER);
            buf.push('\n');
        }
        for row in rows {
            buf.push_str(&row.to_csv());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .wrap_err_with(|| format!("Failed to write {}", self.path.display()))?;

        debug!(path = %self.path.display(), rows = rows.len(), "Appended deposit rows");
        Ok(())
    }

    /// Record every Deposit in `events`, fetching each block timestamp once
    pub async fn record(&self, client: &dyn ChainClient, events: &[BridgeEvent]) -> Result<usize> {
        let mut timestamps: HashMap<u64, u64> = HashMap::new();
        let mut rows = Vec::new();

        for event in events {
            let BridgeEvent::Deposit(deposit) = event else {
                continue;
            };
            let ts = match timestamps.get(&deposit.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = client.block_timestamp(deposit.block_number).await?;
                    timestamps.insert(deposit.block_number, ts);
                    ts
                }
            };
            rows.push(DepositRow::new(deposit, ts)?);
        }

        self.append(&rows)?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockChain;
    use alloy::primitives::{Address, B256, U256};

    fn deposit(block: u64) -> DepositEvent {
        DepositEvent {
            token: Address::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x22),
            amount: U256::from(1_000_000u64),
            tx_hash: B256::repeat_byte(0xab),
            block_number: block,
            log_index: 0,
        }
    }

    #[test]
    fn test_row_format() {
        let row = DepositRow::new(&deposit(42), 1_704_067_200).unwrap();
        let line = row.to_csv();
        let fields: Vec<_> = line.split(',').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "42");
        assert_eq!(fields[1], "2024-01-01T00:00:00Z");
        assert!(fields[2].starts_with("0xabab"));
        assert_eq!(fields[5], "1000000");
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = DepositLog::new(dir.path().join("deposits.csv"));
        let row = DepositRow::new(&deposit(1), 0).unwrap();
        log.append(&[row.clone()]).unwrap();
        log.append(&[row]).unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], DEPOSIT_LOG_HEADER);
        assert_eq!(contents.matches("blockNumber").count(), 1);
    }

    #[tokio::test]
    async fn test_record_skips_unwraps() {
        let dir = tempfile::tempdir().unwrap();
        let log = DepositLog::new(dir.path().join("deposits.csv"));
        let chain = MockChain::new("avax", 43113, 10);
        let events = vec![
            BridgeEvent::Deposit(deposit(3)),
            BridgeEvent::Unwrap(crate::evm::events::UnwrapEvent {
                underlying_token: Address::ZERO,
                wrapped_token: Address::ZERO,
                from: Address::ZERO,
                recipient: Address::ZERO,
                amount: U256::ZERO,
                tx_hash: B256::ZERO,
                block_number: 4,
                log_index: 0,
            }),
        ];
        assert_eq!(log.record(&chain, &events).await.unwrap(), 1);
    }

    #[test]
    fn test_empty_append_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = DepositLog::new(dir.path().join("deposits.csv"));
        log.append(&[]).unwrap();
        assert!(!log.path().exists());
    }
}
