//! EVM RPC Client Wrapper
//!
//! [`ChainClient`] is the seam between the relay logic and a live chain. The
//! scanner and the submission builder only talk to this trait, so tests can
//! drive them with in-memory chains.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::borrow::Cow;
use tracing::info;

use crate::types::ChainEndpoint;

/// Outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Chain access needed by the scanner and the submission builder
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The endpoint this client talks to
    fn endpoint(&self) -> &ChainEndpoint;

    /// Current chain head
    async fn block_number(&self) -> Result<u64>;

    /// Logs matching `filter`
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;

    /// Unix timestamp of block `number`
    async fn block_timestamp(&self, number: u64) -> Result<u64>;

    /// Transaction count of `address` including pending transactions
    async fn pending_nonce(&self, address: Address) -> Result<u64>;

    /// Current legacy gas price in wei
    async fn gas_price(&self) -> Result<u128>;

    /// Gas estimate for `tx`
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    /// Broadcast a signed, EIP-2718 encoded transaction
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256>;

    /// Receipt status, `None` while the transaction is not mined
    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>>;
}

/// Minimal block view used behind the PoA shim
#[derive(Debug, Deserialize)]
struct ShimBlock {
    timestamp: alloy::primitives::U64,
}

/// [`ChainClient`] backed by an alloy HTTP provider
pub struct AlloyChainClient {
    provider: RootProvider<Http<Client>>,
    endpoint: ChainEndpoint,
}

impl AlloyChainClient {
    /// Connect to `endpoint`
    pub fn new(endpoint: ChainEndpoint) -> Result<Self> {
        let url = endpoint
            .rpc_url
            .parse()
            .map_err(|e| eyre!("Invalid RPC URL {}: {}", endpoint.rpc_url, e))?;
        let provider = ProviderBuilder::new().on_http(url);

        info!(
            chain = %endpoint.name,
            chain_id = endpoint.chain_id,
            poa_shim = endpoint.requires_poa_shim,
            "Created EVM client"
        );

        Ok(Self { provider, endpoint })
    }

    /// The underlying provider
    pub fn provider(&self) -> &RootProvider<Http<Client>> {
        &self.provider
    }

    /// Check that the RPC reports the configured chain ID
    pub async fn verify_chain_id(&self) -> Result<()> {
        let reported = self
            .provider
            .get_chain_id()
            .await
            .wrap_err_with(|| format!("Failed to reach {}", self.endpoint.name))?;
        if reported != self.endpoint.chain_id {
            return Err(eyre!(
                "Chain {} reports chain id {} but {} is configured",
                self.endpoint.name,
                reported,
                self.endpoint.chain_id
            ));
        }
        Ok(())
    }

    /// Fetch only the fields we need from a PoA block, skipping strict header decoding
    async fn shim_block(&self, number: u64) -> Result<ShimBlock> {
        let block: Option<ShimBlock> = self
            .provider
            .raw_request(
                Cow::Borrowed("eth_getBlockByNumber"),
                (BlockNumberOrTag::Number(number), false),
            )
            .await
            .wrap_err_with(|| format!("Failed to fetch block {}", number))?;
        block.ok_or_else(|| eyre!("Block {} not found", number))
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn endpoint(&self) -> &ChainEndpoint {
        &self.endpoint
    }

    async fn block_number(&self) -> Result<u64> {
        let block = self
            .provider
            .get_block_number()
            .await
            .wrap_err("Failed to get block number")?;
        Ok(block)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let logs = self
            .provider
            .get_logs(filter)
            .await
            .wrap_err("Failed to get logs")?;
        Ok(logs)
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        if self.endpoint.requires_poa_shim {
            return Ok(self.shim_block(number).await?.timestamp.to());
        }

        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(number),
                alloy::rpc::types::BlockTransactionsKind::Hashes,
            )
            .await
            .wrap_err_with(|| format!("Failed to fetch block {}", number))?
            .ok_or_else(|| eyre!("Block {} not found", number))?;
        Ok(block.header.timestamp)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        let nonce = self
            .provider
            .get_transaction_count(address)
            .pending()
            .await
            .wrap_err("Failed to get transaction count")?;
        Ok(nonce)
    }

    async fn gas_price(&self) -> Result<u128> {
        let price = self
            .provider
            .get_gas_price()
            .await
            .wrap_err("Failed to get gas price")?;
        Ok(price)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let gas = self
            .provider
            .estimate_gas(tx)
            .await
            .wrap_err("Failed to estimate gas")?;
        Ok(gas)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .wrap_err("Failed to send transaction")?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .wrap_err("Failed to get transaction receipt")?;
        Ok(receipt.map(|r| ReceiptStatus {
            success: r.status(),
            block_number: r.block_number,
            gas_used: r.gas_used as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(rpc_url: &str) -> ChainEndpoint {
        ChainEndpoint {
            name: "bsc".to_string(),
            chain_id: 97,
            rpc_url: rpc_url.to_string(),
            requires_poa_shim: true,
        }
    }

    #[test]
    fn test_client_creation() {
        let client = AlloyChainClient::new(endpoint("http://localhost:8545")).unwrap();
        assert_eq!(client.endpoint().chain_id, 97);
        assert!(client.endpoint().requires_poa_shim);
    }

    #[test]
    fn test_invalid_rpc_url_rejected() {
        assert!(AlloyChainClient::new(endpoint("not a url")).is_err());
    }

    #[test]
    fn test_shim_block_parses_poa_payload() {
        // A clique header with 97 bytes of extraData; only the timestamp matters
        let json = format!(
            r#"{{"number":"0x10","timestamp":"0x6560f1a0","extraData":"0x{}"}}"#,
            "ab".repeat(97)
        );
        let block: ShimBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(block.timestamp.to::<u64>(), 0x6560f1a0);
    }
}
