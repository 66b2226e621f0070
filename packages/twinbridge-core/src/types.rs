//! Shared types for both sides of the bridge
//!
//! Chain endpoints and contract bindings are created once at startup and are
//! read-only afterwards.

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Chain Side
// ============================================================================

/// Which end of the bridge a chain plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainSide {
    /// Holds the locked underlying tokens, emits `Deposit`, executes `withdraw`
    Source,
    /// Holds the wrapped tokens, emits `Unwrap`, executes `wrap`
    Destination,
}

impl ChainSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainSide::Source => "source",
            ChainSide::Destination => "destination",
        }
    }

    /// The opposite side
    pub fn other(&self) -> ChainSide {
        match self {
            ChainSide::Source => ChainSide::Destination,
            ChainSide::Destination => ChainSide::Source,
        }
    }
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainSide {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" => Ok(ChainSide::Source),
            "destination" => Ok(ChainSide::Destination),
            other => Err(BindingError::UnknownChain(other.to_string())),
        }
    }
}

// ============================================================================
// Chain Endpoint
// ============================================================================

/// RPC endpoint of one configured chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    /// Human-readable chain name (e.g. "avax", "bsc"), also the contract info key
    pub name: String,
    /// EVM chain ID
    pub chain_id: u64,
    /// JSON-RPC URL
    pub rpc_url: String,
    /// Block headers carry proof-of-authority extra data
    pub requires_poa_shim: bool,
}

// ============================================================================
// Contract Bindings
// ============================================================================

/// Errors raised while loading or checking contract bindings
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("no contract binding configured for chain '{0}'")]
    UnknownChain(String),

    #[error("malformed address '{address}': {reason}")]
    MalformedAddress { address: String, reason: String },

    #[error("contract on '{chain}' does not expose function '{function}'")]
    MissingFunction { chain: String, function: String },

    #[error("failed to parse contract info: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One entry of the contract info file
#[derive(Debug, Clone, Deserialize)]
pub struct ContractInfo {
    pub address: String,
    pub abi: JsonAbi,
}

/// Static `chainName -> {address, abi}` mapping
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct ContractInfoFile(pub HashMap<String, ContractInfo>);

impl ContractInfoFile {
    /// Parse the JSON contract info document
    pub fn from_json(json: &str) -> Result<Self, BindingError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Resolve the binding for `endpoint`, keyed by its chain name
    pub fn binding_for(&self, endpoint: &ChainEndpoint) -> Result<ContractBinding, BindingError> {
        let info = self
            .0
            .get(&endpoint.name)
            .ok_or_else(|| BindingError::UnknownChain(endpoint.name.clone()))?;
        ContractBinding::new(&endpoint.name, endpoint.chain_id, &info.address, info.abi.clone())
    }
}

/// A deployed contract on a specific chain
#[derive(Debug, Clone)]
pub struct ContractBinding {
    pub chain_name: String,
    pub chain_id: u64,
    pub address: Address,
    pub abi: JsonAbi,
}

impl ContractBinding {
    /// Create a binding, validating the address
    pub fn new(
        chain_name: &str,
        chain_id: u64,
        address: &str,
        abi: JsonAbi,
    ) -> Result<Self, BindingError> {
        Ok(Self {
            chain_name: chain_name.to_string(),
            chain_id,
            address: parse_address(address)?,
            abi,
        })
    }

    /// Fail unless every named function is present in the ABI descriptor
    pub fn require_functions(&self, functions: &[&str]) -> Result<(), BindingError> {
        for function in functions {
            if self.abi.function(function).is_none() {
                return Err(BindingError::MissingFunction {
                    chain: self.chain_name.clone(),
                    function: function.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether the ABI descriptor declares the named event
    pub fn has_event(&self, event: &str) -> bool {
        self.abi.event(event).is_some()
    }
}

/// Parse a 0x-prefixed 20-byte hex address
pub fn parse_address(address: &str) -> Result<Address, BindingError> {
    let trimmed = address.trim();
    if trimmed.len() != 42 || !trimmed.starts_with("0x") {
        return Err(BindingError::MalformedAddress {
            address: address.to_string(),
            reason: "expected 42 chars with 0x prefix".to_string(),
        });
    }
    Address::from_str(trimmed).map_err(|e| BindingError::MalformedAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}
