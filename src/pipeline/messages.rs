//! Per-item outcomes and run statistics shared by the pipeline stages
//!
//! ## Design Principles
//!
//! 1. **Tagged results**: every stage reports success, skip or fatal per item
//! 2. **Local recovery**: skips are logged and the stage moves on
//! 3. **Escalation**: only [`ItemOutcome::Fatal`] stops the producer pools

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::broker::BrokerError;
use crate::providers::ProviderError;

/// Result of handling one item in a pool worker
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<T> {
    /// Item handled; `T` travels to the next stage
    Success(T),

    /// Item dropped, the pipeline continues
    Skip(SkipReason),

    /// No further work can succeed, abort the producers
    Fatal(ProviderError),
}

impl<T> ItemOutcome<T> {
    /// Route a provider failure to skip or fatal
    pub fn from_provider_error(err: ProviderError) -> Self {
        if err.is_fatal() {
            ItemOutcome::Fatal(err)
        } else {
            ItemOutcome::Skip(SkipReason::Provider(err))
        }
    }
}

/// Why an item was dropped
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Dedup gate found the furthest day in the log
    AlreadyObserved,

    /// Non-fatal provider failure (not found, transport, payload, decode)
    Provider(ProviderError),

    /// Broker rejected a publish
    Publish(BrokerError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyObserved => write!(f, "already observed"),
            SkipReason::Provider(err) => write!(f, "{err}"),
            SkipReason::Publish(err) => write!(f, "publish failed: {err}"),
        }
    }
}

/// Counters updated by the workers while the pipeline runs
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub requests: AtomicUsize,
    pub invalid_lines: AtomicUsize,
    pub deduplicated: AtomicUsize,
    pub skipped: AtomicUsize,
    pub resolved: AtomicUsize,
    pub fetched: AtomicUsize,
    pub events_published: AtomicUsize,
    pub messages_consumed: AtomicUsize,
    pub samples_aggregated: AtomicUsize,
    pub log_failures: AtomicUsize,

    /// Sends attempted on a channel whose receivers were gone
    pub closed_sends: AtomicUsize,
}

impl PipelineStats {
    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, elapsed: Duration) -> PipelineSummary {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        PipelineSummary {
            requests: load(&self.requests),
            invalid_lines: load(&self.invalid_lines),
            deduplicated: load(&self.deduplicated),
            skipped: load(&self.skipped),
            resolved: load(&self.resolved),
            fetched: load(&self.fetched),
            events_published: load(&self.events_published),
            messages_consumed: load(&self.messages_consumed),
            samples_aggregated: load(&self.samples_aggregated),
            log_failures: load(&self.log_failures),
            closed_sends: load(&self.closed_sends),
            elapsed,
        }
    }
}

/// Final counters of a pipeline run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSummary {
    pub requests: usize,
    pub invalid_lines: usize,
    pub deduplicated: usize,
    pub skipped: usize,
    pub resolved: usize,
    pub fetched: usize,
    pub events_published: usize,
    pub messages_consumed: usize,
    pub samples_aggregated: usize,
    pub log_failures: usize,
    pub closed_sends: usize,
    pub elapsed: Duration,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requests ({} invalid, {} already observed, {} skipped), {} fetched, \
             {} events published, {} samples aggregated in {:?}",
            self.requests,
            self.invalid_lines,
            self.deduplicated,
            self.skipped,
            self.fetched,
            self.events_published,
            self.samples_aggregated,
            self.elapsed
        )
    }
}
