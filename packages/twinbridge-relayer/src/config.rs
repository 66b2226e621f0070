use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use twinbridge_core::evm::{SecretSource, SubmissionConfig};
use twinbridge_core::types::{ChainEndpoint, ChainSide};

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub source: ChainConfig,
    pub destination: ChainConfig,
    /// JSON file mapping chain name to `{address, abi}`
    pub contract_info_path: PathBuf,
    /// Where the process signing key is read from
    pub signer: SecretSource,
    pub relay: RelayConfig,
    pub submission: SubmissionSettings,
    /// Deposit CSV written by relay and scan
    pub event_log_path: PathBuf,
    /// Identity pool used by the claim and identity commands
    pub identity_store_path: PathBuf,
    /// Chain name of the Merkle validator binding
    pub proof_contract_chain: String,
    pub api_port: u16,
}

/// One side of the bridge
#[derive(Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub poa: bool,
}

/// RPC URLs often embed provider API keys; only scheme and host are printed.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("name", &self.name)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &redact_url(&self.rpc_url))
            .field("poa", &self.poa)
            .finish()
    }
}

impl ChainConfig {
    pub fn endpoint(&self) -> ChainEndpoint {
        ChainEndpoint {
            name: self.name.clone(),
            chain_id: self.chain_id,
            rpc_url: self.rpc_url.clone(),
            requires_poa_shim: self.poa,
        }
    }
}

/// Poll loop settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval_ms: u64,
    /// Blocks behind head the first tick starts from
    pub lookback_blocks: u64,
    pub range_query_limit: u64,
    /// Rescans of one failed sub-window before it is abandoned
    pub max_window_retries: u32,
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Transaction submission settings
#[derive(Debug, Clone)]
pub struct SubmissionSettings {
    pub gas_limit: Option<u64>,
    pub receipt_timeout_secs: u64,
}

impl SubmissionSettings {
    pub fn to_submission_config(&self) -> SubmissionConfig {
        SubmissionConfig {
            gas_limit: self.gas_limit,
            wait_for_receipt: true,
            receipt_timeout: Duration::from_secs(self.receipt_timeout_secs),
            ..SubmissionConfig::default()
        }
    }
}

/// Default functions
fn default_source_name() -> String {
    "avax".to_string()
}

fn default_destination_name() -> String {
    "bsc".to_string()
}

fn default_poll_interval() -> u64 {
    3000
}

fn default_lookback_blocks() -> u64 {
    5
}

fn default_range_query_limit() -> u64 {
    twinbridge_core::evm::scanner::DEFAULT_RANGE_QUERY_LIMIT
}

fn default_max_window_retries() -> u32 {
    5
}

fn default_receipt_timeout() -> u64 {
    120
}

fn default_api_port() -> u16 {
    9090
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from a variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| eyre!("{} environment variable is required", key))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let source = ChainConfig {
            name: optional("SOURCE_CHAIN_NAME").unwrap_or_else(default_source_name),
            chain_id: required("SOURCE_CHAIN_ID")?
                .parse()
                .wrap_err("SOURCE_CHAIN_ID must be a valid u64")?,
            rpc_url: required("SOURCE_RPC_URL")?,
            poa: parse_flag(&optional, "SOURCE_POA", true)?,
        };

        let destination = ChainConfig {
            name: optional("DESTINATION_CHAIN_NAME").unwrap_or_else(default_destination_name),
            chain_id: required("DESTINATION_CHAIN_ID")?
                .parse()
                .wrap_err("DESTINATION_CHAIN_ID must be a valid u64")?,
            rpc_url: required("DESTINATION_RPC_URL")?,
            poa: parse_flag(&optional, "DESTINATION_POA", true)?,
        };

        let signer = match (optional("SIGNER_PRIVATE_KEY"), optional("SIGNER_PRIVATE_KEY_FILE")) {
            (Some(_), Some(_)) => {
                return Err(eyre!(
                    "Set only one of SIGNER_PRIVATE_KEY and SIGNER_PRIVATE_KEY_FILE"
                ))
            }
            (Some(_), None) => SecretSource::Env("SIGNER_PRIVATE_KEY".to_string()),
            (None, Some(path)) => SecretSource::File(PathBuf::from(path)),
            (None, None) => {
                return Err(eyre!(
                    "SIGNER_PRIVATE_KEY or SIGNER_PRIVATE_KEY_FILE environment variable is required"
                ))
            }
        };

        let relay = RelayConfig {
            poll_interval_ms: parse_or(&optional, "POLL_INTERVAL_MS", default_poll_interval())?,
            lookback_blocks: parse_or(&optional, "SCAN_LOOKBACK_BLOCKS", default_lookback_blocks())?,
            range_query_limit: parse_or(&optional, "RANGE_QUERY_LIMIT", default_range_query_limit())?,
            max_window_retries: parse_or(&optional, "MAX_WINDOW_RETRIES", default_max_window_retries())?,
        };

        let submission = SubmissionSettings {
            gas_limit: optional("GAS_LIMIT")
                .map(|v| v.parse().wrap_err("GAS_LIMIT must be a valid u64"))
                .transpose()?,
            receipt_timeout_secs: parse_or(&optional, "RECEIPT_TIMEOUT_SECS", default_receipt_timeout())?,
        };

        let proof_contract_chain =
            optional("PROOF_CONTRACT_CHAIN").unwrap_or_else(|| destination.name.clone());

        let config = Config {
            source,
            destination,
            contract_info_path: PathBuf::from(required("CONTRACT_INFO_PATH")?),
            signer,
            relay,
            submission,
            event_log_path: optional("EVENT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("deposit_logs.csv")),
            identity_store_path: optional("IDENTITY_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("identities.txt")),
            proof_contract_chain,
            api_port: parse_or(&optional, "API_PORT", default_api_port())?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Chain settings for one side
    pub fn chain(&self, side: ChainSide) -> &ChainConfig {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Destination => &self.destination,
        }
    }

    /// Chain settings by configured name
    pub fn chain_by_name(&self, name: &str) -> Option<&ChainConfig> {
        [&self.source, &self.destination]
            .into_iter()
            .find(|chain| chain.name == name)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for chain in [&self.source, &self.destination] {
            if !chain.rpc_url.starts_with("http://") && !chain.rpc_url.starts_with("https://") {
                return Err(eyre!(
                    "RPC URL for {} must start with http:// or https://",
                    chain.name
                ));
            }
        }

        if self.source.name == self.destination.name {
            return Err(eyre!(
                "Source and destination chain names must differ (both are '{}')",
                self.source.name
            ));
        }

        if self.source.chain_id == self.destination.chain_id {
            return Err(eyre!(
                "Source and destination chain IDs must differ (both are {})",
                self.source.chain_id
            ));
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }

        if self.relay.range_query_limit == 0 {
            return Err(eyre!("RANGE_QUERY_LIMIT must be greater than 0"));
        }

        if self.chain_by_name(&self.proof_contract_chain).is_none() {
            return Err(eyre!(
                "PROOF_CONTRACT_CHAIN '{}' is neither '{}' nor '{}'",
                self.proof_contract_chain,
                self.source.name,
                self.destination.name
            ));
        }

        Ok(())
    }
}

/// Parse `key` if set, otherwise use `default`; a malformed value is an error
fn parse_or<T: FromStr>(
    optional: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match optional(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has invalid value '{}'", key, v)),
        None => Ok(default),
    }
}

fn parse_flag(
    optional: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(value) = optional(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(eyre!(
            "{} has invalid value '{}'; expected true or false",
            key,
            value
        )),
    }
}

/// `scheme://host[:port]` with path and query dropped
fn redact_url(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.split(['/', '?']).next().unwrap_or_default();
            if host.len() == rest.len() {
                url.to_string()
            } else {
                format!("{}://{}/<redacted>", scheme, host)
            }
        }
        None => "<redacted>".to_string(),
    }
}
