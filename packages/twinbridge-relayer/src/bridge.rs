//! Startup wiring
//!
//! Builds the chain clients, contract bindings, submitters and pollers from a
//! loaded [`Config`]. Missing bindings or ABI functions fail here, before any
//! chain is polled.

use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use tracing::info;

use twinbridge_core::evm::contracts::{
    DESTINATION_REGISTRATION_FUNCTIONS, DESTINATION_RELAY_FUNCTIONS, PROOF_FUNCTIONS,
    SOURCE_REGISTRATION_FUNCTIONS, SOURCE_RELAY_FUNCTIONS,
};
use twinbridge_core::evm::{
    AccountContext, AlloyChainClient, ChainClient, EventScanner, EvmSubmitter, NonceLocks,
    TxSubmitter,
};
use twinbridge_core::{ChainSide, ContractBinding, ContractInfoFile, DepositLog, RelayDispatcher};

use crate::config::Config;
use crate::relay_loop::{watched_event, ChainPoller, SharedStatus};
use crate::retry::{RetryConfig, WindowRetryQueue};

/// What a command is about to call, used to check the ABI up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Relay,
    Registration,
    Proof,
    ReadOnly,
}

fn required_functions(side: ChainSide, purpose: Purpose) -> &'static [&'static str] {
    match (purpose, side) {
        (Purpose::Relay, ChainSide::Source) => SOURCE_RELAY_FUNCTIONS,
        (Purpose::Relay, ChainSide::Destination) => DESTINATION_RELAY_FUNCTIONS,
        (Purpose::Registration, ChainSide::Source) => SOURCE_REGISTRATION_FUNCTIONS,
        (Purpose::Registration, ChainSide::Destination) => DESTINATION_REGISTRATION_FUNCTIONS,
        (Purpose::Proof, _) => PROOF_FUNCTIONS,
        (Purpose::ReadOnly, _) => &[],
    }
}

/// Shared handles for one process
pub struct Bridge {
    config: Config,
    contracts: ContractInfoFile,
    source: Arc<AlloyChainClient>,
    destination: Arc<AlloyChainClient>,
    nonce_locks: Arc<NonceLocks>,
}

impl Bridge {
    /// Read the contract info file and create both chain clients
    pub fn connect(config: Config) -> Result<Self> {
        let json = std::fs::read_to_string(&config.contract_info_path).wrap_err_with(|| {
            format!(
                "Failed to read contract info {}",
                config.contract_info_path.display()
            )
        })?;
        let contracts = ContractInfoFile::from_json(&json).wrap_err("Invalid contract info file")?;

        let source = Arc::new(AlloyChainClient::new(config.source.endpoint())?);
        let destination = Arc::new(AlloyChainClient::new(config.destination.endpoint())?);

        Ok(Self {
            config,
            contracts,
            source,
            destination,
            nonce_locks: Arc::new(NonceLocks::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fail unless both RPCs report their configured chain IDs
    pub async fn verify_chains(&self) -> Result<()> {
        self.source.verify_chain_id().await?;
        self.destination.verify_chain_id().await?;
        Ok(())
    }

    pub fn client(&self, side: ChainSide) -> Arc<AlloyChainClient> {
        match side {
            ChainSide::Source => self.source.clone(),
            ChainSide::Destination => self.destination.clone(),
        }
    }

    /// Side whose configured name is `name`
    pub fn side_by_name(&self, name: &str) -> Result<ChainSide> {
        [ChainSide::Source, ChainSide::Destination]
            .into_iter()
            .find(|side| self.config.chain(*side).name == name)
            .ok_or_else(|| {
                eyre!(
                    "Unknown chain '{}'; expected '{}' or '{}'",
                    name,
                    self.config.source.name,
                    self.config.destination.name
                )
            })
    }

    /// Binding for `side`, checked for the functions `purpose` calls
    pub fn binding(&self, side: ChainSide, purpose: Purpose) -> Result<ContractBinding> {
        let binding = self
            .contracts
            .binding_for(&self.config.chain(side).endpoint())?;
        binding.require_functions(required_functions(side, purpose))?;
        Ok(binding)
    }

    /// Submitter for `side`, sharing this process's nonce locks
    pub fn submitter(&self, side: ChainSide, purpose: Purpose) -> Result<EvmSubmitter> {
        Ok(EvmSubmitter::new(
            self.client(side),
            self.binding(side, purpose)?,
            self.nonce_locks.clone(),
            self.config.submission.to_submission_config(),
        ))
    }

    /// Scanner for the bridge contract on `side`
    pub fn scanner(&self, side: ChainSide) -> Result<EventScanner> {
        let binding = self.binding(side, Purpose::ReadOnly)?;
        let event = watched_event(side);
        if !binding.has_event(event.as_str()) {
            return Err(eyre!(
                "Contract on '{}' does not declare event '{}'",
                binding.chain_name,
                event
            ));
        }
        Ok(EventScanner::new(self.client(side), binding)
            .with_range_query_limit(self.config.relay.range_query_limit))
    }

    /// One poller per side, relaying through a shared dispatcher
    pub fn relay_pollers(&self, account: AccountContext, status: SharedStatus) -> Result<Vec<ChainPoller>> {
        let source: Arc<dyn TxSubmitter> = Arc::new(self.submitter(ChainSide::Source, Purpose::Relay)?);
        let destination: Arc<dyn TxSubmitter> =
            Arc::new(self.submitter(ChainSide::Destination, Purpose::Relay)?);
        let dispatcher = Arc::new(RelayDispatcher::new(source, destination, account));

        let retry = RetryConfig {
            max_retries: self.config.relay.max_window_retries,
            ..RetryConfig::default()
        };

        let mut pollers = Vec::with_capacity(2);
        for side in [ChainSide::Source, ChainSide::Destination] {
            let client: Arc<dyn ChainClient> = self.client(side);
            let mut poller = ChainPoller::new(
                side,
                self.scanner(side)?,
                client,
                dispatcher.clone(),
                WindowRetryQueue::new(retry.clone()),
                self.config.relay.lookback_blocks,
                self.config.relay.poll_interval(),
                status.clone(),
            );
            if side == ChainSide::Source {
                poller = poller.with_deposit_log(DepositLog::new(&self.config.event_log_path));
            }
            info!(chain = %poller.chain_name(), side = %side, "Poller configured");
            pollers.push(poller);
        }
        Ok(pollers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_functions() {
        assert_eq!(
            required_functions(ChainSide::Destination, Purpose::Relay),
            &["wrap"]
        );
        assert_eq!(
            required_functions(ChainSide::Source, Purpose::Registration),
            &["register"]
        );
        assert_eq!(required_functions(ChainSide::Source, Purpose::Proof), &["submit"]);
        assert!(required_functions(ChainSide::Source, Purpose::ReadOnly).is_empty());
    }
}
