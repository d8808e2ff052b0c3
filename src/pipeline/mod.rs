//! Worker pools wiring requests through to the durable log
//!
//! ## Architecture
//!
//! ```text
//! submit ──► intake ──► resolver pool ──► resolved ──► fetch pool
//!                        (dedup, geocode)               (forecast, publish)
//!                                                            │
//!                                          broker topics ◄───┘
//!                                                │
//!            aggregation pool ◄── samples ◄── consumers (group "aggregation")
//!            (gauges, alerts, log append)
//! ```
//!
//! - **Stage channels** are bounded at one slot, so a producer waits until a
//!   worker of the next stage is ready
//! - **Receivers** are shared by all workers of a stage behind a mutex
//! - **Senders** are owned by the producing stage; the last worker to exit
//!   closes the channel for the next stage
//! - **Consumers** subscribe before any producer runs and read from the
//!   earliest offset
//!
//! A fatal outcome (rejected credentials) trips [`FatalSignal`]. Resolvers and
//! fetchers stop taking work, consumers and aggregators still drain whatever
//! was published, and [`Pipeline::finish`] reports the error after the
//! coordinator has walked every phase.

pub mod aggregator;
pub mod fetcher;
pub mod messages;
pub mod resolver;
pub mod shutdown;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{Broker, BrokerError};
use crate::dedup::DedupGate;
use crate::metrics::MetricsStore;
use crate::providers::{ForecastProvider, Geocoder, ProviderError};
use crate::request::parse_line;
use crate::storage::DurableLog;
use crate::{MetricFamily, RawRequest};

pub use messages::{ItemOutcome, PipelineStats, PipelineSummary, SkipReason};
pub use shutdown::{Phase, ShutdownCoordinator, ShutdownError, ShutdownReport, Stage};

/// Consumer group every aggregation consumer joins
pub const CONSUMER_GROUP: &str = "aggregation";

/// Slots per stage channel
const STAGE_CAPACITY: usize = 1;

/// Receiver shared by every worker of one stage
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

#[derive(Debug)]
pub enum PipelineError {
    /// A worker hit an unrecoverable provider error
    Fatal(ProviderError),

    /// Topic provisioning or subscription failed at startup
    Broker(BrokerError),

    Shutdown(ShutdownError),

    /// Intake is no longer accepting requests
    Closed,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Fatal(err) => write!(f, "pipeline aborted: {err}"),
            PipelineError::Broker(err) => write!(f, "broker setup failed: {err}"),
            PipelineError::Shutdown(err) => write!(f, "shutdown failed: {err}"),
            PipelineError::Closed => write!(f, "pipeline intake is closed"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Fatal(err) => Some(err),
            PipelineError::Broker(err) => Some(err),
            PipelineError::Shutdown(err) => Some(err),
            PipelineError::Closed => None,
        }
    }
}

impl From<BrokerError> for PipelineError {
    fn from(err: BrokerError) -> Self {
        PipelineError::Broker(err)
    }
}

impl From<ShutdownError> for PipelineError {
    fn from(err: ShutdownError) -> Self {
        PipelineError::Shutdown(err)
    }
}

/// Process-wide abort flag, carrying the first fatal error
#[derive(Debug, Default)]
pub struct FatalSignal {
    token: CancellationToken,
    error: StdMutex<Option<ProviderError>>,
}

impl FatalSignal {
    /// Record `err` (the first one wins) and stop the producer pools
    pub fn trip(&self, err: ProviderError) {
        if let Ok(mut slot) = self.error.lock() {
            if slot.is_none() {
                error!("fatal error, stopping producers: {err}");
                *slot = Some(err);
            }
        }
        self.token.cancel();
    }

    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been tripped
    pub async fn tripped(&self) {
        self.token.cancelled().await
    }

    pub fn error(&self) -> Option<ProviderError> {
        self.error.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Shared handles every worker needs
pub struct PipelineContext {
    pub dedup: Arc<DedupGate>,
    pub geocoder: Arc<dyn Geocoder>,
    pub forecaster: Arc<dyn ForecastProvider>,
    pub broker: Arc<dyn Broker>,
    pub metrics: Arc<MetricsStore>,
    pub log: Arc<DurableLog>,
    pub stats: PipelineStats,
    pub fatal: FatalSignal,
}

impl PipelineContext {
    pub fn new(
        dedup: Arc<DedupGate>,
        geocoder: Arc<dyn Geocoder>,
        forecaster: Arc<dyn ForecastProvider>,
        broker: Arc<dyn Broker>,
        metrics: Arc<MetricsStore>,
        log: Arc<DurableLog>,
    ) -> Self {
        Self {
            dedup,
            geocoder,
            forecaster,
            broker,
            metrics,
            log,
            stats: PipelineStats::default(),
            fatal: FatalSignal::default(),
        }
    }
}

/// Take the next item from a shared receiver.
///
/// Returns `None` when the channel is closed or the fatal signal trips.
pub(crate) async fn next_item<T>(rx: &SharedReceiver<T>, fatal: &FatalSignal) -> Option<T> {
    tokio::select! {
        biased;
        _ = fatal.tripped() => None,
        item = async { rx.lock().await.recv().await } => item,
    }
}

/// Send an item to the next producer stage.
///
/// Returns `false` if the item could not be delivered and the worker should
/// stop.
pub(crate) async fn hand_off<T>(tx: &mpsc::Sender<T>, item: T, ctx: &PipelineContext) -> bool {
    tokio::select! {
        biased;
        _ = ctx.fatal.tripped() => false,
        sent = tx.send(item) => match sent {
            Ok(()) => true,
            Err(_) => {
                PipelineStats::incr(&ctx.stats.closed_sends);
                error!("next stage closed before its producers finished");
                false
            }
        },
    }
}

/// Log a dropped item and count it
pub(crate) fn report_skip(ctx: &PipelineContext, item: &str, reason: &SkipReason) {
    match reason {
        SkipReason::AlreadyObserved => {
            debug!("{item}: {reason}");
            PipelineStats::incr(&ctx.stats.deduplicated);
        }
        SkipReason::Provider(ProviderError::NotFound(_)) => {
            warn!("skipping {item}: {reason}");
            PipelineStats::incr(&ctx.stats.skipped);
        }
        _ => {
            error!("skipping {item}: {reason}");
            PipelineStats::incr(&ctx.stats.skipped);
        }
    }
}

/// A running pipeline
pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    coordinator: ShutdownCoordinator,
    started: Instant,
}

impl Pipeline {
    /// Provision topics and spawn every pool with `workers` workers each.
    ///
    /// Pools are started downstream first: aggregators, then consumers, then
    /// fetchers, then resolvers.
    #[instrument(skip(ctx))]
    pub async fn start(ctx: Arc<PipelineContext>, workers: usize) -> Result<Self, PipelineError> {
        let workers = workers.max(1);

        for family in MetricFamily::ALL {
            if ctx.broker.ensure_topic(family.topic()).await? {
                info!("created topic {family}");
            } else {
                debug!("topic {family} already exists");
            }
        }

        let (intake_tx, intake_rx) = mpsc::channel::<RawRequest>(STAGE_CAPACITY);
        let (resolved_tx, resolved_rx) = mpsc::channel(STAGE_CAPACITY);
        let (sample_tx, sample_rx) = mpsc::channel(STAGE_CAPACITY);

        let consumer_cancel = CancellationToken::new();
        let mut coordinator = ShutdownCoordinator::new(intake_tx, consumer_cancel.clone());

        let sample_rx: SharedReceiver<_> = Arc::new(Mutex::new(sample_rx));
        for id in 0..workers {
            coordinator
                .barrier(Stage::Aggregation)
                .spawn(aggregator::run_aggregator(id, ctx.clone(), sample_rx.clone()));
        }

        for family in MetricFamily::ALL {
            for id in 0..workers {
                let reader = ctx.broker.subscribe(family.topic(), CONSUMER_GROUP).await?;
                coordinator.barrier(Stage::Consumer).spawn(aggregator::run_consumer(
                    family,
                    id,
                    reader,
                    consumer_cancel.clone(),
                    sample_tx.clone(),
                    ctx.clone(),
                ));
            }
        }
        drop(sample_tx);

        let resolved_rx: SharedReceiver<_> = Arc::new(Mutex::new(resolved_rx));
        for id in 0..workers {
            coordinator
                .barrier(Stage::Fetch)
                .spawn(fetcher::run_worker(id, ctx.clone(), resolved_rx.clone()));
        }

        let intake_rx: SharedReceiver<_> = Arc::new(Mutex::new(intake_rx));
        for id in 0..workers {
            coordinator.barrier(Stage::Resolver).spawn(resolver::run_worker(
                id,
                ctx.clone(),
                intake_rx.clone(),
                resolved_tx.clone(),
            ));
        }
        drop(resolved_tx);

        info!("pipeline started with {workers} workers per pool");

        Ok(Self {
            ctx,
            coordinator,
            started: Instant::now(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.coordinator.phase()
    }

    /// Hand a request to the resolver pool, waiting for a free worker.
    pub async fn submit(&self, request: RawRequest) -> Result<(), PipelineError> {
        let Some(intake) = self.coordinator.intake() else {
            return Err(PipelineError::Closed);
        };

        tokio::select! {
            biased;
            _ = self.ctx.fatal.tripped() => Err(self.fatal_error()),
            sent = intake.send(request) => {
                sent.map_err(|_| PipelineError::Closed)?;
                PipelineStats::incr(&self.ctx.stats.requests);
                Ok(())
            }
        }
    }

    /// Parse and submit one input line; invalid lines are logged and dropped.
    pub async fn submit_line(&self, text: &str, line: usize) -> Result<(), PipelineError> {
        match parse_line(text, line) {
            Ok(request) => self.submit(request).await,
            Err(e) => {
                warn!("{e}");
                PipelineStats::incr(&self.ctx.stats.invalid_lines);
                Ok(())
            }
        }
    }

    fn fatal_error(&self) -> PipelineError {
        self.ctx
            .fatal
            .error()
            .map(PipelineError::Fatal)
            .unwrap_or(PipelineError::Closed)
    }

    /// Close intake and drain every stage.
    ///
    /// A fatal error takes precedence over shutdown errors.
    pub async fn finish(self) -> Result<(PipelineSummary, ShutdownReport), PipelineError> {
        let shutdown = self.coordinator.run().await;
        let summary = self.ctx.stats.snapshot(self.started.elapsed());
        info!("{summary}");

        if let Some(err) = self.ctx.fatal.error() {
            return Err(PipelineError::Fatal(err));
        }

        Ok((summary, shutdown?))
    }
}
