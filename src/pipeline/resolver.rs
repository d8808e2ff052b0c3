//! Location resolver pool: dedup check, then geocoding

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

use super::messages::{ItemOutcome, PipelineStats, SkipReason};
use super::{PipelineContext, SharedReceiver, hand_off, next_item, report_skip};
use crate::{RawRequest, ResolvedLocation};

/// Resolver worker loop, runs until intake closes or the fatal signal trips
#[instrument(skip(ctx, requests, resolved_tx))]
pub async fn run_worker(
    id: usize,
    ctx: Arc<PipelineContext>,
    requests: SharedReceiver<RawRequest>,
    resolved_tx: mpsc::Sender<ResolvedLocation>,
) {
    while let Some(request) = next_item(&requests, &ctx.fatal).await {
        trace!("line {}: resolving {}", request.source_line, request.location_code);

        match resolve(&ctx, &request).await {
            ItemOutcome::Success(location) => {
                if !hand_off(&resolved_tx, location, &ctx).await {
                    break;
                }
            }
            ItemOutcome::Skip(reason) => report_skip(&ctx, &request.location_code, &reason),
            ItemOutcome::Fatal(err) => {
                ctx.fatal.trip(err);
                break;
            }
        }
    }

    debug!("resolver worker {id} stopped");
}

/// Run one request through the dedup gate and the geocoder
pub async fn resolve(ctx: &PipelineContext, request: &RawRequest) -> ItemOutcome<ResolvedLocation> {
    if !ctx
        .dedup
        .should_fetch(&request.location_code, request.day_count)
        .await
    {
        return ItemOutcome::Skip(SkipReason::AlreadyObserved);
    }

    match ctx.geocoder.resolve(&request.location_code).await {
        Ok(geo) => {
            PipelineStats::incr(&ctx.stats.resolved);
            debug!(
                "resolved {} to {} ({}, {})",
                request.location_code, geo.name, geo.latitude, geo.longitude
            );
            ItemOutcome::Success(ResolvedLocation {
                day_count: request.day_count,
                display_name: geo.name,
                latitude: geo.latitude,
                longitude: geo.longitude,
                location_code: request.location_code.clone(),
                source_line: request.source_line,
            })
        }
        Err(err) => ItemOutcome::from_provider_error(err),
    }
}
