//! Phase-sequenced shutdown of the pipeline
//!
//! ## Phases
//!
//! ```text
//! ProducersOpen
//!     │ drop intake sender, wait for resolver workers
//!     ▼
//! DedupStageClosing
//!     │ resolved channel closes with the last resolver, wait for fetch workers
//!     ▼
//! FetchStageClosing
//!     │ cancel consumers, they drain their topics, wait for them
//!     ▼
//! BrokerDrain
//!     │ sample channel closes with the last consumer, wait for aggregators
//!     ▼
//! AggregationDrain
//!     │
//!     ▼
//! Stopped
//! ```
//!
//! Channel senders are owned by the producing stage only. The coordinator
//! holds nothing but the intake sender, so no channel can close while a
//! producer into it is still running.

use std::fmt;
use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::RawRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ProducersOpen,
    DedupStageClosing,
    FetchStageClosing,
    BrokerDrain,
    AggregationDrain,
    Stopped,
}

impl Phase {
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::ProducersOpen => Some(Phase::DedupStageClosing),
            Phase::DedupStageClosing => Some(Phase::FetchStageClosing),
            Phase::FetchStageClosing => Some(Phase::BrokerDrain),
            Phase::BrokerDrain => Some(Phase::AggregationDrain),
            Phase::AggregationDrain => Some(Phase::Stopped),
            Phase::Stopped => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// Attempted to skip or repeat a phase
    OutOfOrder { from: Phase, to: Phase },

    /// Workers that panicked or were aborted while draining
    WorkerFailed { failures: usize },
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownError::OutOfOrder { from, to } => {
                write!(f, "shutdown cannot move from {from:?} to {to:?}")
            }
            ShutdownError::WorkerFailed { failures } => {
                write!(f, "{failures} worker(s) failed during shutdown")
            }
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Pipeline stages with their own completion barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolver,
    Fetch,
    Consumer,
    Aggregation,
}

/// Wait-for-all-workers primitive for one stage
pub struct StageBarrier {
    stage: Stage,
    workers: JoinSet<()>,
}

impl StageBarrier {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            workers: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.workers.spawn(worker);
    }

    /// Wait until every worker has returned; yields the number that failed
    async fn wait(&mut self) -> usize {
        let mut failures = 0;
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!("{:?} worker failed: {e}", self.stage);
                failures += 1;
            }
        }
        debug!("{:?} stage drained", self.stage);
        failures
    }
}

/// What the coordinator observed while shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every phase entered, in order
    pub phases: Vec<Phase>,
}

pub struct ShutdownCoordinator {
    phase: Phase,
    history: Vec<Phase>,
    intake: Option<mpsc::Sender<RawRequest>>,
    consumer_cancel: CancellationToken,
    resolvers: StageBarrier,
    fetchers: StageBarrier,
    consumers: StageBarrier,
    aggregators: StageBarrier,
}

impl ShutdownCoordinator {
    pub fn new(intake: mpsc::Sender<RawRequest>, consumer_cancel: CancellationToken) -> Self {
        Self {
            phase: Phase::ProducersOpen,
            history: vec![Phase::ProducersOpen],
            intake: Some(intake),
            consumer_cancel,
            resolvers: StageBarrier::new(Stage::Resolver),
            fetchers: StageBarrier::new(Stage::Fetch),
            consumers: StageBarrier::new(Stage::Consumer),
            aggregators: StageBarrier::new(Stage::Aggregation),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Sender for new requests, `None` once intake has closed
    pub fn intake(&self) -> Option<&mpsc::Sender<RawRequest>> {
        self.intake.as_ref()
    }

    pub fn barrier(&mut self, stage: Stage) -> &mut StageBarrier {
        match stage {
            Stage::Resolver => &mut self.resolvers,
            Stage::Fetch => &mut self.fetchers,
            Stage::Consumer => &mut self.consumers,
            Stage::Aggregation => &mut self.aggregators,
        }
    }

    /// Move exactly one phase forward
    pub fn advance(&mut self, to: Phase) -> Result<(), ShutdownError> {
        if self.phase.next() != Some(to) {
            return Err(ShutdownError::OutOfOrder {
                from: self.phase,
                to,
            });
        }
        debug!("shutdown phase {:?} -> {to:?}", self.phase);
        self.phase = to;
        self.history.push(to);
        Ok(())
    }

    /// Walk every phase, waiting on each stage before closing the next.
    pub async fn run(mut self) -> Result<ShutdownReport, ShutdownError> {
        let mut failures = 0;

        self.advance(Phase::DedupStageClosing)?;
        drop(self.intake.take());
        failures += self.resolvers.wait().await;

        self.advance(Phase::FetchStageClosing)?;
        failures += self.fetchers.wait().await;

        self.advance(Phase::BrokerDrain)?;
        self.consumer_cancel.cancel();
        failures += self.consumers.wait().await;

        self.advance(Phase::AggregationDrain)?;
        failures += self.aggregators.wait().await;

        self.advance(Phase::Stopped)?;
        info!("pipeline stopped");

        if failures > 0 {
            return Err(ShutdownError::WorkerFailed { failures });
        }

        Ok(ShutdownReport {
            phases: self.history,
        })
    }
}
