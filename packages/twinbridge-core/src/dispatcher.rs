//! Relay dispatch
//!
//! Maps each observed bridge event to its counter-action on the opposite
//! chain:
//!
//! | Event (chain)          | Action (chain)                                  |
//! |------------------------|-------------------------------------------------|
//! | `Deposit` (source)     | `wrap(token, recipient, amount)` (destination)  |
//! | `Unwrap` (destination) | `withdraw(underlying, to, amount)` (source)     |
//!
//! The dispatcher keeps no record of what it has relayed. Replay protection
//! is the destination contracts' job; dispatching the same event twice
//! submits twice.

use std::sync::Arc;
use tracing::{error, info};

use crate::evm::events::BridgeEvent;
use crate::evm::signer::AccountContext;
use crate::evm::submitter::{BridgeCall, SubmissionError, SubmissionOutcome, TxSubmitter};
use crate::types::ChainSide;

/// The chain and call that answer `event`
pub fn counter_action(event: &BridgeEvent) -> (ChainSide, BridgeCall) {
    match event {
        BridgeEvent::Deposit(deposit) => (
            ChainSide::Destination,
            BridgeCall::Wrap {
                token: deposit.token,
                recipient: deposit.recipient,
                amount: deposit.amount,
            },
        ),
        BridgeEvent::Unwrap(unwrap) => (
            ChainSide::Source,
            BridgeCall::Withdraw {
                token: unwrap.underlying_token,
                recipient: unwrap.recipient,
                amount: unwrap.amount,
            },
        ),
    }
}

/// Result of relaying one event
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub event: BridgeEvent,
    pub target: ChainSide,
    pub call: BridgeCall,
    pub result: Result<SubmissionOutcome, SubmissionError>,
}

impl DispatchRecord {
    /// Broadcast and, when receipts are awaited, mined with success
    pub fn is_success(&self) -> bool {
        matches!(
            &self.result,
            Ok(SubmissionOutcome::Broadcast { .. } | SubmissionOutcome::Confirmed { .. })
        )
    }

    /// Broadcast but no receipt arrived in time
    pub fn is_unconfirmed(&self) -> bool {
        matches!(&self.result, Ok(SubmissionOutcome::Unconfirmed { .. }))
    }

    /// Failed before broadcast and safe to submit again
    pub fn is_retryable(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_retryable())
    }
}

/// Sends counter-actions through one submitter per side
pub struct RelayDispatcher {
    source: Arc<dyn TxSubmitter>,
    destination: Arc<dyn TxSubmitter>,
    account: AccountContext,
}

impl RelayDispatcher {
    pub fn new(
        source: Arc<dyn TxSubmitter>,
        destination: Arc<dyn TxSubmitter>,
        account: AccountContext,
    ) -> Self {
        Self {
            source,
            destination,
            account,
        }
    }

    fn submitter(&self, side: ChainSide) -> &Arc<dyn TxSubmitter> {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Destination => &self.destination,
        }
    }

    /// Relay a single event
    pub async fn dispatch(&self, event: &BridgeEvent) -> DispatchRecord {
        let (target, call) = counter_action(event);
        let submitter = self.submitter(target);
        let result = submitter.submit(&self.account, &call).await;

        match &result {
            Ok(outcome) => info!(
                event = %event.kind(),
                block = event.block_number(),
                log_index = event.log_index(),
                source_tx = %event.tx_hash(),
                target = %submitter.chain_name(),
                tx_hash = %outcome.tx_hash(),
                status = outcome.status(),
                "Relayed event"
            ),
            Err(e) => error!(
                event = %event.kind(),
                block = event.block_number(),
                log_index = event.log_index(),
                source_tx = %event.tx_hash(),
                target = %submitter.chain_name(),
                error = %e,
                "Failed to relay event"
            ),
        }

        DispatchRecord {
            event: event.clone(),
            target,
            call,
            result,
        }
    }

    /// Relay `events` one after another, in the order given
    ///
    /// A failed submission does not stop the rest.
    pub async fn dispatch_all(&self, events: &[BridgeEvent]) -> Vec<DispatchRecord> {
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            records.push(self.dispatch(event).await);
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evm::events::{DepositEvent, UnwrapEvent};
    use crate::evm::signer::Account;
    use crate::testing::RecordingSubmitter;
    use alloy::primitives::{Address, B256, U256};

    fn deposit(block: u64, amount: u64) -> BridgeEvent {
        BridgeEvent::Deposit(DepositEvent {
            token: Address::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x22),
            amount: U256::from(amount),
            tx_hash: B256::repeat_byte(block as u8),
            block_number: block,
            log_index: 0,
        })
    }

    fn unwrap_event() -> BridgeEvent {
        BridgeEvent::Unwrap(UnwrapEvent {
            underlying_token: Address::repeat_byte(0x11),
            wrapped_token: Address::repeat_byte(0x33),
            from: Address::repeat_byte(0x44),
            recipient: Address::repeat_byte(0x55),
            amount: U256::from(7u64),
            tx_hash: B256::repeat_byte(9),
            block_number: 9,
            log_index: 2,
        })
    }

    fn setup() -> (Arc<RecordingSubmitter>, Arc<RecordingSubmitter>, RelayDispatcher) {
        let source = Arc::new(RecordingSubmitter::new("avax"));
        let destination = Arc::new(RecordingSubmitter::new("bsc"));
        let dispatcher = RelayDispatcher::new(
            source.clone(),
            destination.clone(),
            AccountContext::new(Account::random()),
        );
        (source, destination, dispatcher)
    }

    #[test]
    fn test_unwrap_withdraws_underlying_token() {
        let (side, call) = counter_action(&unwrap_event());
        assert_eq!(side, ChainSide::Source);
        assert_eq!(
            call,
            BridgeCall::Withdraw {
                token: Address::repeat_byte(0x11),
                recipient: Address::repeat_byte(0x55),
                amount: U256::from(7u64),
            }
        );
    }

    #[tokio::test]
    async fn test_deposit_wraps_on_destination() {
        let (source, destination, dispatcher) = setup();
        let record = dispatcher.dispatch(&deposit(5, 100)).await;

        assert!(record.is_success());
        assert!(source.calls().is_empty());
        assert_eq!(destination.calls().len(), 1);
        assert_eq!(destination.calls()[0].call.function_name(), "wrap");
    }

    #[tokio::test]
    async fn test_dispatch_all_keeps_order_and_continues_after_failure() {
        let (source, destination, dispatcher) = setup();
        source.fail_with(SubmissionError::Broadcast {
            function: "withdraw".to_string(),
            reason: "nonce too low".to_string(),
        });

        let events = vec![deposit(1, 10), unwrap_event(), deposit(3, 30)];
        let records = dispatcher.dispatch_all(&events).await;

        assert_eq!(records.len(), 3);
        assert!(records[0].is_success());
        assert!(!records[1].is_success());
        assert!(records[2].is_success());
        assert_eq!(source.calls().len(), 1);

        let amounts: Vec<_> = destination
            .calls()
            .into_iter()
            .map(|c| match c.call {
                BridgeCall::Wrap { amount, .. } => amount,
                other => panic!("unexpected call {:?}", other),
            })
            .collect();
        assert_eq!(amounts, vec![U256::from(10u64), U256::from(30u64)]);
    }

    fn record(result: Result<SubmissionOutcome, SubmissionError>) -> DispatchRecord {
        let event = deposit(1, 10);
        let (target, call) = counter_action(&event);
        DispatchRecord {
            event,
            target,
            call,
            result,
        }
    }

    #[test]
    fn test_unconfirmed_is_not_success() {
        let unconfirmed = record(Ok(SubmissionOutcome::Unconfirmed {
            tx_hash: B256::repeat_byte(1),
            nonce: 0,
        }));
        assert!(!unconfirmed.is_success());
        assert!(unconfirmed.is_unconfirmed());
        assert!(!unconfirmed.is_retryable());

        let confirmed = record(Ok(SubmissionOutcome::Confirmed {
            tx_hash: B256::repeat_byte(1),
            nonce: 0,
            block_number: Some(3),
            gas_used: 21_000,
        }));
        assert!(confirmed.is_success());
        assert!(!confirmed.is_unconfirmed());
    }

    #[test]
    fn test_only_rpc_failures_are_retryable() {
        let rpc = record(Err(SubmissionError::Rpc {
            function: "wrap".to_string(),
            reason: "connection refused".to_string(),
        }));
        assert!(rpc.is_retryable());

        let rejected = record(Err(SubmissionError::Broadcast {
            function: "wrap".to_string(),
            reason: "nonce too low".to_string(),
        }));
        assert!(!rejected.is_retryable());

        let reverted = record(Ok(SubmissionOutcome::Reverted {
            tx_hash: B256::repeat_byte(2),
            nonce: 1,
            block_number: None,
        }));
        assert!(!reverted.is_retryable());
        assert!(!reverted.is_success());
    }
}
