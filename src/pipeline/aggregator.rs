//! Aggregation consumers and workers
//!
//! Consumers pull from one family topic each and forward decoded samples;
//! aggregation workers update the gauges and append to the durable log.
//! Neither stops on the fatal signal: everything that reached the broker is
//! still aggregated.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use super::messages::PipelineStats;
use super::{PipelineContext, SharedReceiver};
use crate::MetricFamily;
use crate::broker::TopicReader;
use crate::broker::payload::decode_message;
use crate::storage::AggregatedSample;

/// Consumer loop for one topic reader, runs until `cancel` fires and the topic
/// backlog is drained
#[instrument(skip(reader, cancel, samples_tx, ctx))]
pub async fn run_consumer(
    family: MetricFamily,
    id: usize,
    mut reader: Box<dyn TopicReader>,
    cancel: CancellationToken,
    samples_tx: mpsc::Sender<AggregatedSample>,
    ctx: Arc<PipelineContext>,
) {
    while let Some(message) = reader.next(&cancel).await {
        PipelineStats::incr(&ctx.stats.messages_consumed);

        let sample = match decode_message(&message) {
            Ok(sample) => sample,
            Err(e) => {
                error!(
                    "skipping message '{}' at offset {} on {}: {e}",
                    message.key, message.offset, message.topic
                );
                PipelineStats::incr(&ctx.stats.skipped);
                continue;
            }
        };

        if samples_tx.send(sample).await.is_err() {
            PipelineStats::incr(&ctx.stats.closed_sends);
            error!("aggregation workers are gone, {family} consumer {id} stopping");
            break;
        }
    }

    debug!("{family} consumer {id} drained");
}

/// Aggregation worker loop, runs until every consumer has exited
#[instrument(skip(ctx, samples))]
pub async fn run_aggregator(
    id: usize,
    ctx: Arc<PipelineContext>,
    samples: SharedReceiver<AggregatedSample>,
) {
    loop {
        let next = samples.lock().await.recv().await;
        let Some(sample) = next else {
            break;
        };
        aggregate(&ctx, sample).await;
    }

    debug!("aggregation worker {id} stopped");
}

/// Apply one sample to the gauges and append it to the durable log.
///
/// Returns whether the sample was applied. A failed append is logged and
/// counted; the gauges keep the new value.
pub async fn aggregate(ctx: &PipelineContext, sample: AggregatedSample) -> bool {
    let Some(reading) = sample.reading() else {
        error!("sample from unknown topic '{}' dropped", sample.topic);
        PipelineStats::incr(&ctx.stats.skipped);
        return false;
    };

    ctx.metrics.record(&sample.zip, &sample.date, &reading);

    match ctx.log.append(&sample).await {
        Ok(()) => ctx.dedup.observe(&sample),
        Err(e) => {
            error!(
                "failed to append {} {}-{} to {}: {e}",
                sample.topic,
                sample.zip,
                sample.date,
                ctx.log.path().display()
            );
            PipelineStats::incr(&ctx.stats.log_failures);
        }
    }

    trace!("aggregated {} for {} on {}", sample.topic, sample.zip, sample.date);
    PipelineStats::incr(&ctx.stats.samples_aggregated);
    true
}
