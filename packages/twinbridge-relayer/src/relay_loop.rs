//! Per-chain relay poll loops
//!
//! Each side of the bridge gets one [`ChainPoller`]. A tick first resubmits
//! events whose submission failed on an RPC read, then rescans any due failed
//! sub-windows, then scans `cursor..=head` for the side's event kind, relays
//! every event through the shared dispatcher and moves the cursor past the
//! head. Ticks on one chain never overlap; shutdown is only observed between
//! ticks.

use eyre::{eyre, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use twinbridge_core::evm::{
    BridgeEvent, BridgeEventKind, ChainClient, EventScanner, PartialFailure, ScanReport,
    ScanWindow, WindowError,
};
use twinbridge_core::{ChainSide, DepositLog, DispatchRecord, RelayDispatcher};

use crate::metrics;
use crate::retry::{EventRetryQueue, PendingWindow, WindowRetryQueue};

/// The event a side emits and the relayer answers
pub fn watched_event(side: ChainSide) -> BridgeEventKind {
    match side {
        ChainSide::Source => BridgeEventKind::Deposit,
        ChainSide::Destination => BridgeEventKind::Unwrap,
    }
}

// ============================================================================
// Shared Status
// ============================================================================

/// What the health endpoint reports for one chain
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ChainStatus {
    pub last_scanned_block: Option<u64>,
    pub events_seen: u64,
    pub relayed: u64,
    /// Broadcast without a receipt before the timeout
    pub unconfirmed: u64,
    pub failed_submissions: u64,
    pub pending_windows: usize,
    pub abandoned_windows: u64,
    /// Events waiting to be resubmitted
    pub pending_events: usize,
    pub abandoned_events: u64,
}

/// Per-chain status keyed by chain name
pub type SharedStatus = Arc<RwLock<BTreeMap<String, ChainStatus>>>;

// ============================================================================
// Tick
// ============================================================================

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// The fresh window scanned, if the head moved
    pub window: Option<ScanWindow>,
    /// Failed sub-windows rescanned this tick
    pub retried: usize,
    /// Events submitted again after an RPC failure
    pub resubmitted: usize,
    pub events: usize,
    pub relayed: usize,
    pub unconfirmed: usize,
    pub failed_submissions: usize,
    pub partial_failures: usize,
    pub abandoned: usize,
    pub abandoned_events: usize,
}

/// Scans one chain and relays what it finds
pub struct ChainPoller {
    side: ChainSide,
    kind: BridgeEventKind,
    scanner: EventScanner,
    client: Arc<dyn ChainClient>,
    dispatcher: Arc<RelayDispatcher>,
    deposit_log: Option<DepositLog>,
    retries: WindowRetryQueue,
    event_retries: EventRetryQueue,
    lookback_blocks: u64,
    poll_interval: Duration,
    cursor: Option<u64>,
    status: SharedStatus,
}

impl ChainPoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        side: ChainSide,
        scanner: EventScanner,
        client: Arc<dyn ChainClient>,
        dispatcher: Arc<RelayDispatcher>,
        retries: WindowRetryQueue,
        lookback_blocks: u64,
        poll_interval: Duration,
        status: SharedStatus,
    ) -> Self {
        Self {
            side,
            kind: watched_event(side),
            scanner,
            client,
            dispatcher,
            deposit_log: None,
            event_retries: EventRetryQueue::new(retries.config().clone()),
            retries,
            lookback_blocks,
            poll_interval,
            cursor: None,
            status,
        }
    }

    /// Append relayed Deposits to `log`
    pub fn with_deposit_log(mut self, log: DepositLog) -> Self {
        self.deposit_log = Some(log);
        self
    }

    pub fn chain_name(&self) -> &str {
        self.scanner.chain_name()
    }

    /// Next block the poller will scan
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn pending_windows(&self) -> usize {
        self.retries.len()
    }

    pub fn pending_events(&self) -> usize {
        self.event_retries.len()
    }

    /// Run one tick at time `now`
    pub async fn tick(&mut self, now: Instant) -> Result<TickSummary, WindowError> {
        let mut summary = TickSummary::default();

        self.resubmit(now, &mut summary).await;

        for pending in self.retries.take_due(now) {
            self.rescan(pending, now, &mut summary).await;
        }

        let head = self.scanner.head().await?;
        let cursor = *self
            .cursor
            .get_or_insert_with(|| (head + 1).saturating_sub(self.lookback_blocks));

        if cursor <= head {
            let window = ScanWindow::new(self.chain_name(), cursor, head)?;
            debug!(
                chain = %self.chain_name(),
                from_block = cursor,
                to_block = head,
                "Scanning new blocks"
            );
            let report = self.scanner.scan_window(self.kind, &window).await;
            self.relay(&report, now, &mut summary).await;

            for failure in report.failures() {
                metrics::record_partial_failure(self.chain_name());
                summary.partial_failures += 1;
                self.retries.push_failure(failure, now);
            }

            metrics::record_window_scanned(self.chain_name(), cursor, head);
            self.cursor = Some(head + 1);
            summary.window = Some(window);
        }

        metrics::set_pending_windows(self.chain_name(), self.retries.len());
        metrics::set_pending_events(self.chain_name(), self.event_retries.len());
        self.publish(&summary, head).await;
        Ok(summary)
    }

    async fn rescan(&mut self, pending: PendingWindow, now: Instant, summary: &mut TickSummary) {
        summary.retried += 1;
        info!(
            window = %pending.window,
            attempt = pending.attempts + 1,
            "Rescanning failed window"
        );
        let report = self.scanner.scan_window(self.kind, &pending.window).await;
        self.relay(&report, now, summary).await;

        for PartialFailure { window, reason } in report.failures() {
            metrics::record_partial_failure(self.chain_name());
            summary.partial_failures += 1;
            let retry = PendingWindow {
                window,
                attempts: pending.attempts + 1,
                last_reason: reason,
                retry_at: now,
            };
            if self.retries.requeue(retry, now).is_some() {
                metrics::record_abandoned_window(self.chain_name());
                summary.abandoned += 1;
            }
        }
    }

    /// Resubmit due events whose earlier submission never left the process
    async fn resubmit(&mut self, now: Instant, summary: &mut TickSummary) {
        for pending in self.event_retries.take_due(now) {
            summary.resubmitted += 1;
            info!(
                chain = %self.chain_name(),
                event = %pending.event.kind(),
                block = pending.event.block_number(),
                log_index = pending.event.log_index(),
                attempt = pending.attempts + 1,
                "Resubmitting event"
            );
            let record = self.dispatcher.dispatch(&pending.event).await;
            if let Some(reason) = tally(&record, summary) {
                let retry = crate::retry::PendingEvent {
                    attempts: pending.attempts + 1,
                    last_reason: reason,
                    ..pending
                };
                if self.event_retries.requeue(retry, now).is_some() {
                    metrics::record_abandoned_event(self.chain_name());
                    summary.abandoned_events += 1;
                }
            }
        }
    }

    /// Dispatch every event of `report` in order and log deposits
    async fn relay(&mut self, report: &ScanReport, now: Instant, summary: &mut TickSummary) {
        let events = report.events();
        if events.is_empty() {
            return;
        }
        metrics::record_events_detected(self.chain_name(), self.kind.as_str(), events.len());
        summary.events += events.len();

        for record in self.dispatcher.dispatch_all(&events).await {
            if let Some(reason) = tally(&record, summary) {
                self.event_retries.push_failure(record.event, reason, now);
            }
        }

        self.log_deposits(&events).await;
    }

    async fn log_deposits(&self, events: &[BridgeEvent]) {
        let Some(log) = &self.deposit_log else {
            return;
        };
        match log.record(self.client.as_ref(), events).await {
            Ok(0) => {}
            Ok(rows) => debug!(chain = %self.chain_name(), rows, "Logged deposits"),
            Err(e) => {
                metrics::record_error(self.chain_name(), "event_log");
                error!(
                    chain = %self.chain_name(),
                    path = %log.path().display(),
                    error = %e,
                    "Failed to append deposit log"
                );
            }
        }
    }

    async fn publish(&self, summary: &TickSummary, head: u64) {
        let mut status = self.status.write().await;
        let entry = status.entry(self.chain_name().to_string()).or_default();
        if summary.window.is_some() {
            entry.last_scanned_block = Some(head);
        }
        entry.events_seen += summary.events as u64;
        entry.relayed += summary.relayed as u64;
        entry.unconfirmed += summary.unconfirmed as u64;
        entry.failed_submissions += summary.failed_submissions as u64;
        entry.pending_windows = self.retries.len();
        entry.abandoned_windows += summary.abandoned as u64;
        entry.pending_events = self.event_retries.len();
        entry.abandoned_events += summary.abandoned_events as u64;
    }

    /// Tick every poll interval until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            chain = %self.chain_name(),
            side = %self.side,
            event = %self.kind,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting chain poller"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            let started = std::time::Instant::now();
            match self.tick(Instant::now()).await {
                Ok(summary) => {
                    if summary.events > 0 || summary.retried > 0 || summary.resubmitted > 0 {
                        info!(
                            chain = %self.chain_name(),
                            events = summary.events,
                            relayed = summary.relayed,
                            failed = summary.failed_submissions,
                            retried = summary.retried,
                            resubmitted = summary.resubmitted,
                            pending_windows = self.retries.len(),
                            pending_events = self.event_retries.len(),
                            "Tick complete"
                        );
                    }
                }
                Err(WindowError::HeadUnavailable { chain, reason }) => {
                    let class = crate::retry::classify_error(&reason);
                    metrics::record_error(&chain, class.as_str());
                    warn!(chain = %chain, error = %reason, "Chain head unavailable, retrying next tick");
                }
                Err(e) => return Err(eyre!("poller for {} failed: {}", self.chain_name(), e)),
            }
            metrics::record_tick_duration(self.chain_name(), started.elapsed().as_secs_f64());
        }

        info!(
            chain = %self.chain_name(),
            cursor = ?self.cursor,
            pending_windows = self.retries.len(),
            pending_events = self.event_retries.len(),
            "Chain poller stopped"
        );
        Ok(())
    }
}

/// Record metrics and counts for one dispatch
///
/// Returns the failure reason when the event should be submitted again.
fn tally(record: &DispatchRecord, summary: &mut TickSummary) -> Option<String> {
    let target = record.target.as_str();
    let function = record.call.function_name();
    match &record.result {
        Ok(outcome) => {
            metrics::record_submission(target, function, outcome.status());
            if record.is_success() {
                summary.relayed += 1;
            } else if record.is_unconfirmed() {
                summary.unconfirmed += 1;
            } else {
                summary.failed_submissions += 1;
            }
            None
        }
        Err(e) => {
            let reason = e.to_string();
            let class = crate::retry::classify_error(&reason);
            metrics::record_submission(target, function, "failed");
            metrics::record_error(target, class.as_str());
            summary.failed_submissions += 1;
            record.is_retryable().then_some(reason)
        }
    }
}

/// Run all pollers until shutdown, or until one of them fails
pub async fn run_pollers(pollers: Vec<ChainPoller>, shutdown: watch::Receiver<bool>) -> Result<()> {
    let mut join_set = tokio::task::JoinSet::new();
    for poller in pollers {
        join_set.spawn(poller.run(shutdown.clone()));
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("A chain poller stopped with error: {:?}", e);
                join_set.abort_all();
                return Err(e);
            }
            Err(e) => {
                error!("A chain poller task panicked: {:?}", e);
                join_set.abort_all();
                return Err(eyre!("chain poller task panicked: {}", e));
            }
        }
    }
    Ok(())
}
