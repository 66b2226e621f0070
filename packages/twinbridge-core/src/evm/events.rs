//! EVM Event Parsing
//!
//! Provides normalized event structures for the two bridge events the relayer
//! reacts to, decoded from raw RPC logs.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::evm::contracts::{DestinationBridge, SourceBridge};

/// Event names the scanner understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeEventKind {
    Deposit,
    Unwrap,
}

impl BridgeEventKind {
    /// topic0 of the event
    pub fn signature_hash(&self) -> B256 {
        match self {
            BridgeEventKind::Deposit => SourceBridge::Deposit::SIGNATURE_HASH,
            BridgeEventKind::Unwrap => DestinationBridge::Unwrap::SIGNATURE_HASH,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeEventKind::Deposit => "Deposit",
            BridgeEventKind::Unwrap => "Unwrap",
        }
    }
}

impl fmt::Display for BridgeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeEventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deposit" => Ok(BridgeEventKind::Deposit),
            "Unwrap" => Ok(BridgeEventKind::Unwrap),
            other => Err(DecodeError::UnknownEvent(other.to_string())),
        }
    }
}

/// Why a single log could not be turned into a [`BridgeEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown event name '{0}'")]
    UnknownEvent(String),

    #[error("log is missing {0}")]
    MissingField(&'static str),

    #[error("ABI mismatch: {0}")]
    Abi(String),
}

/// Tokens locked on the source chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositEvent {
    /// Underlying token address on the source chain
    pub token: Address,
    /// Recipient of the wrapped tokens on the destination chain
    pub recipient: Address,
    pub amount: U256,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

/// Wrapped tokens burned on the destination chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnwrapEvent {
    /// Underlying token the source bridge should release
    pub underlying_token: Address,
    /// Wrapped token that was burned
    pub wrapped_token: Address,
    /// Account that burned the wrapped tokens
    pub from: Address,
    /// Recipient of the underlying tokens on the source chain
    pub recipient: Address,
    pub amount: U256,
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

/// Normalized bridge event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    Deposit(DepositEvent),
    Unwrap(UnwrapEvent),
}

impl BridgeEvent {
    pub fn kind(&self) -> BridgeEventKind {
        match self {
            BridgeEvent::Deposit(_) => BridgeEventKind::Deposit,
            BridgeEvent::Unwrap(_) => BridgeEventKind::Unwrap,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            BridgeEvent::Deposit(e) => e.block_number,
            BridgeEvent::Unwrap(e) => e.block_number,
        }
    }

    pub fn log_index(&self) -> u64 {
        match self {
            BridgeEvent::Deposit(e) => e.log_index,
            BridgeEvent::Unwrap(e) => e.log_index,
        }
    }

    pub fn tx_hash(&self) -> B256 {
        match self {
            BridgeEvent::Deposit(e) => e.tx_hash,
            BridgeEvent::Unwrap(e) => e.tx_hash,
        }
    }

    /// Ordering key inside a scan window
    pub fn position(&self) -> (u64, u64) {
        (self.block_number(), self.log_index())
    }
}

/// Location metadata every relayed log must carry
fn log_position(log: &Log) -> Result<(B256, u64, u64), DecodeError> {
    let tx_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingField("transaction hash"))?;
    let block_number = log
        .block_number
        .ok_or(DecodeError::MissingField("block number"))?;
    let log_index = log.log_index.ok_or(DecodeError::MissingField("log index"))?;
    Ok((tx_hash, block_number, log_index))
}

/// Decode `log` as the given event kind
pub fn decode_log(kind: BridgeEventKind, log: &Log) -> Result<BridgeEvent, DecodeError> {
    let (tx_hash, block_number, log_index) = log_position(log)?;

    match kind {
        BridgeEventKind::Deposit => {
            let decoded = log
                .log_decode::<SourceBridge::Deposit>()
                .map_err(|e| DecodeError::Abi(e.to_string()))?;
            let data = decoded.inner.data;
            Ok(BridgeEvent::Deposit(DepositEvent {
                token: data.token,
                recipient: data.recipient,
                amount: data.amount,
                tx_hash,
                block_number,
                log_index,
            }))
        }
        BridgeEventKind::Unwrap => {
            let decoded = log
                .log_decode::<DestinationBridge::Unwrap>()
                .map_err(|e| DecodeError::Abi(e.to_string()))?;
            let data = decoded.inner.data;
            Ok(BridgeEvent::Unwrap(UnwrapEvent {
                underlying_token: data.underlying_token,
                wrapped_token: data.wrapped_token,
                from: data.frm,
                recipient: data.to,
                amount: data.amount,
                tx_hash,
                block_number,
                log_index,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, b256, LogData};

    fn rpc_log(address: Address, data: LogData, block: u64, index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log { address, data },
            block_hash: None,
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(b256!(
                "00000000000000000000000000000000000000000000000000000000000000aa"
            )),
            transaction_index: Some(0),
            log_index: Some(index),
            removed: false,
        }
    }

    #[test]
    fn test_decode_deposit() {
        let event = SourceBridge::Deposit {
            token: address!("1000000000000000000000000000000000000001"),
            recipient: address!("2000000000000000000000000000000000000002"),
            amount: U256::from(500u64),
        };
        let log = rpc_log(Address::ZERO, event.encode_log_data(), 12, 3);

        let decoded = decode_log(BridgeEventKind::Deposit, &log).unwrap();
        match decoded {
            BridgeEvent::Deposit(d) => {
                assert_eq!(d.token, event.token);
                assert_eq!(d.recipient, event.recipient);
                assert_eq!(d.amount, U256::from(500u64));
                assert_eq!(d.block_number, 12);
                assert_eq!(d.log_index, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_unwrap() {
        let event = DestinationBridge::Unwrap {
            underlying_token: address!("1000000000000000000000000000000000000001"),
            wrapped_token: address!("3000000000000000000000000000000000000003"),
            frm: address!("4000000000000000000000000000000000000004"),
            to: address!("2000000000000000000000000000000000000002"),
            amount: U256::from(9u64),
        };
        let log = rpc_log(Address::ZERO, event.encode_log_data(), 40, 0);

        let decoded = decode_log(BridgeEventKind::Unwrap, &log).unwrap();
        assert_eq!(decoded.kind(), BridgeEventKind::Unwrap);
        assert_eq!(decoded.position(), (40, 0));
        match decoded {
            BridgeEvent::Unwrap(u) => {
                assert_eq!(u.underlying_token, event.underlying_token);
                assert_eq!(u.wrapped_token, event.wrapped_token);
                assert_eq!(u.from, event.frm);
                assert_eq!(u.recipient, event.to);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_mismatched_kind_fails() {
        let event = SourceBridge::Deposit {
            token: Address::ZERO,
            recipient: Address::ZERO,
            amount: U256::ZERO,
        };
        let log = rpc_log(Address::ZERO, event.encode_log_data(), 1, 0);
        assert!(matches!(
            decode_log(BridgeEventKind::Unwrap, &log),
            Err(DecodeError::Abi(_))
        ));
    }

    #[test]
    fn test_decode_missing_position() {
        let event = SourceBridge::Deposit {
            token: Address::ZERO,
            recipient: Address::ZERO,
            amount: U256::ZERO,
        };
        let mut log = rpc_log(Address::ZERO, event.encode_log_data(), 1, 0);
        log.log_index = None;
        assert_eq!(
            decode_log(BridgeEventKind::Deposit, &log),
            Err(DecodeError::MissingField("log index"))
        );
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Deposit".parse::<BridgeEventKind>().unwrap(), BridgeEventKind::Deposit);
        assert!("Transfer".parse::<BridgeEventKind>().is_err());
    }
}
