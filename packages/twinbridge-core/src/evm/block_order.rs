//! Priority-fee ordering check for a block
//!
//! A block is priority ordered when its transactions appear in non-increasing
//! order of priority fee. The fee of one transaction is:
//!
//! - dynamic-fee tx in a block with a base fee: `min(max_priority_fee, max_fee - base_fee)`
//! - legacy tx in a block with a base fee: `gas_price - base_fee`
//! - any tx in a block without a base fee: `gas_price`
//!
//! Fees are signed: a legacy transaction priced under the base fee has a
//! negative tip.
//!
//! On chains behind the PoA shim the block is read as raw JSON and only the
//! fee fields are extracted.

use alloy::consensus::Transaction as _;
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::U128;
use alloy::providers::Provider;
use alloy::rpc::types::BlockTransactionsKind;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::borrow::Cow;

use crate::evm::client::{AlloyChainClient, ChainClient};

/// Fee fields of one transaction as the block reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxFees {
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl TxFees {
    pub fn legacy(gas_price: u128) -> Self {
        Self {
            gas_price: Some(gas_price),
            ..Default::default()
        }
    }

    pub fn dynamic(max_fee_per_gas: u128, max_priority_fee_per_gas: u128) -> Self {
        Self {
            gas_price: None,
            max_fee_per_gas: Some(max_fee_per_gas),
            max_priority_fee_per_gas: Some(max_priority_fee_per_gas),
        }
    }

    /// Tip paid to the block producer
    pub fn priority_fee(&self, base_fee: Option<u128>) -> i128 {
        match (base_fee, self.max_fee_per_gas, self.max_priority_fee_per_gas) {
            (Some(base), Some(max_fee), Some(max_priority)) => {
                (max_priority as i128).min(max_fee as i128 - base as i128)
            }
            (Some(base), _, _) => self.gas_price.unwrap_or_default() as i128 - base as i128,
            (None, _, _) => self
                .gas_price
                .or(self.max_fee_per_gas)
                .unwrap_or_default() as i128,
        }
    }
}

/// True iff priority fees never increase along the block
pub fn is_priority_ordered(base_fee: Option<u128>, txs: &[TxFees]) -> bool {
    txs.windows(2)
        .all(|pair| pair[0].priority_fee(base_fee) >= pair[1].priority_fee(base_fee))
}

/// Base fee and per-transaction fees of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFees {
    pub number: u64,
    pub base_fee: Option<u128>,
    pub txs: Vec<TxFees>,
}

impl BlockFees {
    pub fn is_priority_ordered(&self) -> bool {
        is_priority_ordered(self.base_fee, &self.txs)
    }
}

/// Fee fields of a raw `eth_getBlockByNumber` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShimFeeBlock {
    #[serde(default)]
    base_fee_per_gas: Option<U128>,
    #[serde(default)]
    transactions: Vec<ShimFeeTx>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShimFeeTx {
    #[serde(default)]
    gas_price: Option<U128>,
    #[serde(default)]
    max_fee_per_gas: Option<U128>,
    #[serde(default)]
    max_priority_fee_per_gas: Option<U128>,
}

impl ShimFeeBlock {
    fn into_fees(self, number: u64) -> BlockFees {
        let to = |v: U128| v.to::<u128>();
        let txs = self
            .transactions
            .into_iter()
            .map(|tx| match tx.max_priority_fee_per_gas {
                Some(priority) => TxFees {
                    gas_price: tx.gas_price.map(to),
                    max_fee_per_gas: tx.max_fee_per_gas.or(tx.gas_price).map(to),
                    max_priority_fee_per_gas: Some(to(priority)),
                },
                None => TxFees::legacy(tx.gas_price.map(to).unwrap_or_default()),
            })
            .collect();
        BlockFees {
            number,
            base_fee: self.base_fee_per_gas.map(to),
            txs,
        }
    }
}

impl AlloyChainClient {
    /// Fetch a block with full transactions and extract its fee fields
    pub async fn block_fees(&self, number: u64) -> Result<BlockFees> {
        if self.endpoint().requires_poa_shim {
            return self.shim_block_fees(number).await;
        }

        let block = self
            .provider()
            .get_block_by_number(BlockNumberOrTag::Number(number), BlockTransactionsKind::Full)
            .await
            .wrap_err_with(|| format!("Failed to fetch block {}", number))?
            .ok_or_else(|| eyre!("Block {} not found", number))?;

        let txs = block
            .transactions
            .as_transactions()
            .ok_or_else(|| eyre!("Block {} returned without transaction bodies", number))?
            .iter()
            .map(|tx| match tx.max_priority_fee_per_gas() {
                Some(priority) => TxFees {
                    gas_price: tx.effective_gas_price,
                    max_fee_per_gas: Some(tx.max_fee_per_gas()),
                    max_priority_fee_per_gas: Some(priority),
                },
                None => TxFees::legacy(tx.gas_price().unwrap_or_default()),
            })
            .collect();

        Ok(BlockFees {
            number,
            base_fee: block.header.base_fee_per_gas.map(u128::from),
            txs,
        })
    }

    async fn shim_block_fees(&self, number: u64) -> Result<BlockFees> {
        let block: Option<ShimFeeBlock> = self
            .provider()
            .raw_request(
                Cow::Borrowed("eth_getBlockByNumber"),
                (BlockNumberOrTag::Number(number), true),
            )
            .await
            .wrap_err_with(|| format!("Failed to fetch block {}", number))?;
        let block = block.ok_or_else(|| eyre!("Block {} not found", number))?;
        Ok(block.into_fees(number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_london_uses_gas_price() {
        let txs = [TxFees::legacy(30), TxFees::legacy(20), TxFees::legacy(20)];
        assert!(is_priority_ordered(None, &txs));
        let txs = [TxFees::legacy(20), TxFees::legacy(30)];
        assert!(!is_priority_ordered(None, &txs));
    }

    #[test]
    fn test_dynamic_fee_capped_by_max_fee() {
        // base 100: tip = min(50, 120 - 100) = 20
        assert_eq!(TxFees::dynamic(120, 50).priority_fee(Some(100)), 20);
        // base 100: tip = min(5, 200 - 100) = 5
        assert_eq!(TxFees::dynamic(200, 5).priority_fee(Some(100)), 5);
    }

    #[test]
    fn test_mixed_block() {
        let base = Some(100);
        // tips: 30, 20, 5
        let txs = [TxFees::legacy(130), TxFees::dynamic(120, 50), TxFees::dynamic(200, 5)];
        assert!(is_priority_ordered(base, &txs));

        // tips: 5, 30
        let txs = [TxFees::dynamic(200, 5), TxFees::legacy(130)];
        assert!(!is_priority_ordered(base, &txs));
    }

    #[test]
    fn test_legacy_under_base_fee_is_negative() {
        assert_eq!(TxFees::legacy(90).priority_fee(Some(100)), -10);
    }

    #[test]
    fn test_trivial_blocks_are_ordered() {
        assert!(is_priority_ordered(Some(1), &[]));
        assert!(is_priority_ordered(Some(1), &[TxFees::legacy(1)]));
    }

    #[test]
    fn test_poa_block_fees_parsed_from_raw_json() {
        // Clique header with 97 bytes of extraData; tips 30 then 20
        let json = format!(
            r#"{{
                "number": "0x10",
                "extraData": "0x{}",
                "baseFeePerGas": "0x64",
                "transactions": [
                    {{"type": "0x0", "gasPrice": "0x82"}},
                    {{"type": "0x2", "gasPrice": "0x78", "maxFeePerGas": "0x78", "maxPriorityFeePerGas": "0x32"}}
                ]
            }}"#,
            "ab".repeat(97)
        );
        let block: ShimFeeBlock = serde_json::from_str(&json).unwrap();
        let fees = block.into_fees(16);
        assert_eq!(fees.base_fee, Some(100));
        assert_eq!(fees.txs, vec![TxFees::legacy(130), TxFees {
            gas_price: Some(120),
            max_fee_per_gas: Some(120),
            max_priority_fee_per_gas: Some(50),
        }]);
        assert!(fees.is_priority_ordered());
    }

    #[test]
    fn test_pre_london_poa_block() {
        let json = r#"{"number": "0x1", "transactions": [{"gasPrice": "0x5"}, {"gasPrice": "0x9"}]}"#;
        let fees = serde_json::from_str::<ShimFeeBlock>(json).unwrap().into_fees(1);
        assert_eq!(fees.base_fee, None);
        assert!(!fees.is_priority_ordered());
    }
}
