//! Error classification and retry bookkeeping
//!
//! Classification only labels errors for logs and metrics. Two things are
//! retried: failed range queries, which are read-only, and events whose
//! submission failed on an RPC read before anything was signed. A broadcast
//! transaction is never resubmitted from here.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

use twinbridge_core::evm::{BridgeEvent, PartialFailure, ScanWindow};

/// Backoff between rescans of a failed sub-window
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of rescans per sub-window
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Classifies errors for logs and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// RPC timeout, connectivity, rate limiting
    Transient,
    /// Gas price below what the node accepts
    Underpriced,
    /// Nonce already used
    NonceTooLow,
    /// Nonce ahead of the account's pending count
    NonceTooHigh,
    /// Revert, bad signature, insufficient funds
    Permanent,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Underpriced => "underpriced",
            ErrorClass::NonceTooLow => "nonce_too_low",
            ErrorClass::NonceTooHigh => "nonce_too_high",
            ErrorClass::Permanent => "permanent",
            ErrorClass::Unknown => "unknown",
        }
    }
}

/// Classify an RPC error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("underpriced")
        || error_lower.contains("replacement transaction")
        || error_lower.contains("gas price too low")
        || error_lower.contains("max fee per gas less than")
    {
        return ErrorClass::Underpriced;
    }

    if error_lower.contains("nonce too low")
        || error_lower.contains("already known")
        || error_lower.contains("already been processed")
    {
        return ErrorClass::NonceTooLow;
    }

    if error_lower.contains("nonce too high") {
        return ErrorClass::NonceTooHigh;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("invalid parameters")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

// ============================================================================
// Window Retry Queue
// ============================================================================

/// A failed sub-window waiting to be rescanned
#[derive(Debug, Clone)]
pub struct PendingWindow {
    pub window: ScanWindow,
    pub attempts: u32,
    pub last_reason: String,
    pub retry_at: Instant,
}

/// Failed sub-windows of one chain, oldest first
#[derive(Debug)]
pub struct WindowRetryQueue {
    config: RetryConfig,
    pending: VecDeque<PendingWindow>,
}

impl WindowRetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue a fresh failure from a regular tick
    pub fn push_failure(&mut self, failure: PartialFailure, now: Instant) {
        self.requeue(
            PendingWindow {
                window: failure.window,
                attempts: 0,
                last_reason: failure.reason,
                retry_at: now,
            },
            now,
        );
    }

    /// Schedule another attempt, or give up once retries are exhausted
    ///
    /// Returns the window back when it is abandoned.
    pub fn requeue(&mut self, mut pending: PendingWindow, now: Instant) -> Option<PendingWindow> {
        if !self.config.should_retry(pending.attempts) {
            error!(
                window = %pending.window,
                attempts = pending.attempts,
                reason = %pending.last_reason,
                "Abandoning scan window after repeated failures; events in it were not relayed"
            );
            return Some(pending);
        }
        pending.retry_at = now + self.config.backoff_for_attempt(pending.attempts);
        debug!(
            window = %pending.window,
            attempts = pending.attempts,
            "Queued scan window for retry"
        );
        self.pending.push_back(pending);
        None
    }

    /// Remove and return every window whose backoff has elapsed, oldest first
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingWindow> {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.retry_at <= now);
        self.pending = waiting.into();
        due
    }
}

// ============================================================================
// Event Retry Queue
// ============================================================================

/// An event whose counter-action never left the process
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event: BridgeEvent,
    pub attempts: u32,
    pub last_reason: String,
    pub retry_at: Instant,
}

/// Events of one chain waiting to be resubmitted
#[derive(Debug)]
pub struct EventRetryQueue {
    config: RetryConfig,
    pending: Vec<PendingEvent>,
}

impl EventRetryQueue {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Queue an event after its first failed submission
    pub fn push_failure(&mut self, event: BridgeEvent, reason: String, now: Instant) {
        self.requeue(
            PendingEvent {
                event,
                attempts: 0,
                last_reason: reason,
                retry_at: now,
            },
            now,
        );
    }

    /// Schedule another submission, or give up once retries are exhausted
    ///
    /// Returns the event back when it is abandoned.
    pub fn requeue(&mut self, mut pending: PendingEvent, now: Instant) -> Option<PendingEvent> {
        if !self.config.should_retry(pending.attempts) {
            error!(
                event = %pending.event.kind(),
                block = pending.event.block_number(),
                log_index = pending.event.log_index(),
                source_tx = %pending.event.tx_hash(),
                attempts = pending.attempts,
                reason = %pending.last_reason,
                "Abandoning relay of event after repeated submission failures"
            );
            return Some(pending);
        }
        pending.retry_at = now + self.config.backoff_for_attempt(pending.attempts);
        debug!(
            block = pending.event.block_number(),
            log_index = pending.event.log_index(),
            attempts = pending.attempts,
            "Queued event for resubmission"
        );
        self.pending.push(pending);
        None
    }

    /// Remove and return every event whose backoff has elapsed, in
    /// (block, log index) order
    pub fn take_due(&mut self, now: Instant) -> Vec<PendingEvent> {
        let (mut due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.retry_at <= now);
        self.pending = waiting;
        due.sort_by_key(|p| p.event.position());
        due
    }
}
