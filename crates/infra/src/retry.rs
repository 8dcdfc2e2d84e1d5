//! Retry policy and the background sweep that re-attempts failed events.
//!
//! A failed event stays unprocessed with its error text and `retry_count` on the
//! row. The sweep picks it up again once its backoff has elapsed. After
//! `max_attempts` failures the event is dead-lettered: the sweep leaves it alone
//! and only an explicit `Engine::retry_event` touches it again.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use carebase_events::EventRecord;

use crate::event_store::EventStore;
use crate::router::{EventRouter, ProcessOutcome, RouterError};
use crate::workers::WorkerHandle;

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every attempt
    Fixed,
    /// base * 2^(attempt - 1)
    #[default]
    Exponential,
    /// base * attempt
    Linear,
}

/// Retry policy for events whose projection failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Failures after which the event is dead-lettered (0 = never retried)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) added on top of the computed delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Failed events are dead-lettered immediately.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Delay to wait after failure number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi(attempt.saturating_sub(1).min(62) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter keeps sweeps reproducible in tests.
        let jitter_ms = if self.jitter > 0.0 {
            let factor = ((attempt as u64 * 17) % 100) as f64 / 100.0;
            delay_ms * self.jitter * factor
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter_ms) as u64)
    }

    /// Whether an event that has failed `attempts` times may be retried.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn is_dead_lettered(&self, event: &EventRecord) -> bool {
        !event.is_processed() && event.retry_count > 0 && !self.should_retry(event.retry_count)
    }

    /// Is a failed event's backoff over at `now`?
    ///
    /// Events that never failed are always due.
    pub fn is_due(&self, event: &EventRecord, now: DateTime<Utc>) -> bool {
        match event.last_attempt_at {
            None => true,
            Some(last) => {
                let wait = chrono::Duration::from_std(self.delay_for_attempt(event.retry_count))
                    .unwrap_or(chrono::Duration::MAX);
                last.checked_add_signed(wait).is_none_or(|due| due <= now)
            }
        }
    }
}

/// Counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub processed: usize,
    pub failed: usize,
    pub waiting: usize,
    pub dead_lettered: usize,
}

/// Re-attempts unprocessed events according to a `RetryPolicy`.
pub struct RetrySweeper<S> {
    router: Arc<EventRouter<S>>,
    policy: RetryPolicy,
}

impl<S> RetrySweeper<S>
where
    S: EventStore + 'static,
{
    pub fn new(router: Arc<EventRouter<S>>, policy: RetryPolicy) -> Self {
        Self { router, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// One pass over the unprocessed backlog.
    ///
    /// A stream is attempted only at its oldest unprocessed event; later events
    /// of a blocked stream would only fail the version guard.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, RouterError> {
        let mut report = SweepReport::default();
        let mut seen = HashSet::new();

        for event in self.router.store().unprocessed()? {
            let key = event.stream_key();
            if seen.contains(&key) {
                continue;
            }
            seen.insert(key);

            if self.policy.is_dead_lettered(&event) {
                report.dead_lettered += 1;
                continue;
            }
            if !self.policy.is_due(&event, now) {
                report.waiting += 1;
                continue;
            }

            report.attempted += 1;
            match self.router.process_record(&event)? {
                ProcessOutcome::Failed { .. } => report.failed += 1,
                ProcessOutcome::Processed { .. } | ProcessOutcome::Unrouted | ProcessOutcome::Skipped => {
                    report.processed += 1
                }
            }
        }

        if report.attempted > 0 || report.dead_lettered > 0 {
            debug!(
                attempted = report.attempted,
                processed = report.processed,
                failed = report.failed,
                waiting = report.waiting,
                dead_lettered = report.dead_lettered,
                "retry sweep finished"
            );
        }
        Ok(report)
    }

    /// Run `sweep` every `interval` on a dedicated thread until shut down.
    pub fn spawn(self, interval: Duration) -> std::io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("carebase-retry-sweeper".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "retry sweeper started");
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                    if let Err(err) = self.sweep(Utc::now()) {
                        warn!(error = %err, "retry sweep failed");
                    }
                }
                info!("retry sweeper stopped");
            })?;

        Ok(WorkerHandle::new(shutdown_tx, vec![join]))
    }
}
