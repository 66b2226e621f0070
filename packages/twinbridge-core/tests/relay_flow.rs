//! Relay flow tests against in-memory chains
//!
//! Drives scanning, dispatch and submission end to end with
//! `twinbridge_core::testing::MockChain` standing in for both RPC endpoints.
//!
//! ```bash
//! cargo test -p twinbridge-core --test relay_flow
//! ```

use alloy::consensus::Transaction as _;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, U256};
use alloy::sol_types::{SolCall, SolEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use twinbridge_core::evm::contracts::{DestinationBridge, SourceBridge};
use twinbridge_core::evm::{
    Account, AccountContext, BlockRef, BridgeCall, BridgeEventKind, EventScanner, EvmSubmitter,
    NonceLocks, SubmissionConfig, SubmissionOutcome, TxSubmitter,
};
use twinbridge_core::testing::MockChain;
use twinbridge_core::{ContractBinding, RelayDispatcher};

const SOURCE_CONTRACT: &str = "0x00000000000000000000000000000000000000a1";
const DESTINATION_CONTRACT: &str = "0x00000000000000000000000000000000000000b2";

struct Harness {
    source: Arc<MockChain>,
    destination: Arc<MockChain>,
    scanner: EventScanner,
    dispatcher: RelayDispatcher,
}

fn binding(chain: &str, chain_id: u64, address: &str) -> ContractBinding {
    ContractBinding::new(chain, chain_id, address, JsonAbi::default()).unwrap()
}

fn fast_submission() -> SubmissionConfig {
    SubmissionConfig {
        gas_limit: None,
        wait_for_receipt: true,
        receipt_timeout: Duration::from_secs(2),
        receipt_poll_interval: Duration::from_millis(5),
    }
}

fn submitter(chain: Arc<MockChain>, binding: ContractBinding, locks: Arc<NonceLocks>) -> Arc<EvmSubmitter> {
    Arc::new(EvmSubmitter::new(chain, binding, locks, fast_submission()))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

fn harness() -> Harness {
    init_tracing();
    let source = Arc::new(MockChain::new("avax", 43113, 100));
    let destination = Arc::new(MockChain::new("bsc", 97, 500));
    let locks = Arc::new(NonceLocks::new());

    let source_binding = binding("avax", 43113, SOURCE_CONTRACT);
    let destination_binding = binding("bsc", 97, DESTINATION_CONTRACT);

    let scanner = EventScanner::new(source.clone(), source_binding.clone());
    let dispatcher = RelayDispatcher::new(
        submitter(source.clone(), source_binding, locks.clone()),
        submitter(destination.clone(), destination_binding, locks),
        AccountContext::new(Account::random()),
    );

    Harness {
        source,
        destination,
        scanner,
        dispatcher,
    }
}

fn push_deposit(chain: &MockChain, block: u64, log_index: u64, amount: u64) {
    let event = SourceBridge::Deposit {
        token: Address::repeat_byte(0x11),
        recipient: Address::repeat_byte(0x22),
        amount: U256::from(amount),
    };
    chain.push_log(SOURCE_CONTRACT.parse().unwrap(), event.encode_log_data(), block, log_index);
}

fn wrapped_amounts(chain: &MockChain) -> Vec<U256> {
    chain
        .sent_transactions()
        .iter()
        .map(|tx| {
            DestinationBridge::wrapCall::abi_decode(tx.input(), true)
                .unwrap()
                ._amount
        })
        .collect()
}

#[tokio::test]
async fn test_deposits_relayed_as_wraps_in_order() {
    let h = harness();
    push_deposit(&h.source, 95, 2, 300);
    push_deposit(&h.source, 92, 0, 100);
    push_deposit(&h.source, 95, 1, 200);

    let report = h
        .scanner
        .scan(BridgeEventKind::Deposit, BlockRef::Number(90), BlockRef::Latest)
        .await
        .unwrap();
    let records = h.dispatcher.dispatch_all(&report.events()).await;

    assert!(records.iter().all(|r| r.is_success()));
    assert_eq!(
        wrapped_amounts(&h.destination),
        vec![U256::from(100u64), U256::from(200u64), U256::from(300u64)]
    );

    let sent = h.destination.sent_transactions();
    let nonces: Vec<u64> = sent.iter().map(|tx| tx.nonce()).collect();
    assert_eq!(nonces, vec![0, 1, 2]);
    assert!(sent
        .iter()
        .all(|tx| tx.to() == Some(DESTINATION_CONTRACT.parse().unwrap())));
    assert!(sent.iter().all(|tx| tx.chain_id() == Some(97)));
    assert!(h.source.sent_transactions().is_empty());
}

#[tokio::test]
async fn test_duplicate_deposit_submitted_twice() {
    let h = harness();
    push_deposit(&h.source, 50, 0, 42);

    let report = h
        .scanner
        .scan(BridgeEventKind::Deposit, BlockRef::Number(50), BlockRef::Number(50))
        .await
        .unwrap();
    let events = report.events();
    assert_eq!(events.len(), 1);

    let duplicated = vec![events[0].clone(), events[0].clone()];
    let records = h.dispatcher.dispatch_all(&duplicated).await;

    assert_eq!(records.len(), 2);
    assert_eq!(h.destination.sent_transactions().len(), 2);
    assert_eq!(
        wrapped_amounts(&h.destination),
        vec![U256::from(42u64), U256::from(42u64)]
    );
}

#[tokio::test]
async fn test_failed_sub_window_rescanned_later() {
    let h = harness();
    push_deposit(&h.source, 20, 0, 1);
    push_deposit(&h.source, 45, 0, 2);
    h.source.fail_block(45, 1);

    // 41 blocks: one query per block
    let report = h
        .scanner
        .scan(BridgeEventKind::Deposit, BlockRef::Number(10), BlockRef::Number(50))
        .await
        .unwrap();
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(
        (failures[0].window.start_block, failures[0].window.end_block),
        (45, 45)
    );
    assert_eq!(report.events().len(), 1);

    let retry = h
        .scanner
        .scan_window(BridgeEventKind::Deposit, &failures[0].window)
        .await;
    assert!(retry.is_complete());
    assert_eq!(retry.events().len(), 1);
    assert_eq!(retry.events()[0].block_number(), 45);
}

#[tokio::test]
async fn test_concurrent_submissions_get_distinct_nonces() {
    let chain = Arc::new(MockChain::new("bsc", 97, 10).with_rpc_delay(Duration::from_millis(20)));
    let locks = Arc::new(NonceLocks::new());
    let target = binding("bsc", 97, DESTINATION_CONTRACT);

    // Two independent submitters sharing one lock registry
    let a = submitter(chain.clone(), target.clone(), locks.clone());
    let b = submitter(chain.clone(), target, locks);
    let ctx = AccountContext::new(Account::random());

    let call = |amount: u64| BridgeCall::Wrap {
        token: Address::repeat_byte(1),
        recipient: Address::repeat_byte(2),
        amount: U256::from(amount),
    };
    let (call_a, call_b, call_c) = (call(1), call(2), call(3));

    let (ra, rb, rc) = tokio::join!(
        a.submit(&ctx, &call_a),
        b.submit(&ctx, &call_b),
        a.submit(&ctx, &call_c)
    );
    assert_ok!(ra);
    assert_ok!(rb);
    assert_ok!(rc);

    let nonces: HashSet<u64> = chain.sent_transactions().iter().map(|tx| tx.nonce()).collect();
    assert_eq!(nonces, HashSet::from([0, 1, 2]));
}

#[tokio::test]
async fn test_reverted_receipt_is_not_retried() {
    let chain = Arc::new(MockChain::new("avax", 43113, 10));
    chain.revert_selector(SourceBridge::withdrawCall::SELECTOR);
    let target = binding("avax", 43113, SOURCE_CONTRACT);
    let sub = submitter(chain.clone(), target, Arc::new(NonceLocks::new()));

    let outcome = sub
        .submit(
            &AccountContext::new(Account::random()),
            &BridgeCall::Withdraw {
                token: Address::repeat_byte(1),
                recipient: Address::repeat_byte(2),
                amount: U256::from(5u64),
            },
        )
        .await
        .unwrap();

    assert!(matches!(outcome, SubmissionOutcome::Reverted { nonce: 0, .. }));
    assert_eq!(chain.sent_transactions().len(), 1);
}

#[tokio::test]
async fn test_missing_receipt_reports_unconfirmed() {
    let chain = Arc::new(MockChain::new("bsc", 97, 10));
    chain.withhold_receipts();
    let config = SubmissionConfig {
        receipt_timeout: Duration::from_millis(30),
        ..fast_submission()
    };
    let sub = EvmSubmitter::new(
        chain.clone(),
        binding("bsc", 97, DESTINATION_CONTRACT),
        Arc::new(NonceLocks::new()),
        config,
    );

    let outcome = sub
        .submit(
            &AccountContext::new(Account::random()),
            &BridgeCall::Register {
                token: Address::repeat_byte(3),
            },
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SubmissionOutcome::Unconfirmed { .. }));
}

#[tokio::test]
async fn test_fixed_gas_limit_used_when_configured() {
    let chain = Arc::new(MockChain::new("bsc", 97, 10));
    let config = SubmissionConfig {
        gas_limit: Some(250_000),
        wait_for_receipt: false,
        ..fast_submission()
    };
    let sub = EvmSubmitter::new(
        chain.clone(),
        binding("bsc", 97, DESTINATION_CONTRACT),
        Arc::new(NonceLocks::new()),
        config,
    );
    let outcome = sub
        .submit(
            &AccountContext::new(Account::random()),
            &BridgeCall::Register {
                token: Address::repeat_byte(3),
            },
        )
        .await
        .unwrap();

    assert!(matches!(outcome, SubmissionOutcome::Broadcast { nonce: 0, .. }));
    assert_eq!(chain.sent_transactions()[0].gas_limit(), 250_000);
}
