//! Forecast fetch pool: forecast, decompose, publish

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, instrument, warn};

use super::messages::{ItemOutcome, PipelineStats, SkipReason};
use super::{PipelineContext, SharedReceiver, next_item, report_skip};
use crate::broker::payload::encode_event;
use crate::providers::ForecastSample;
use crate::util::local_date;
use crate::{MetricEvent, Reading, ResolvedLocation, SAMPLES_PER_DAY};

/// Fetch worker loop, runs until the resolved channel closes or the fatal
/// signal trips
#[instrument(skip(ctx, locations))]
pub async fn run_worker(
    id: usize,
    ctx: Arc<PipelineContext>,
    locations: SharedReceiver<ResolvedLocation>,
) {
    while let Some(location) = next_item(&locations, &ctx.fatal).await {
        match fetch(&ctx, &location).await {
            ItemOutcome::Success(published) => {
                debug!("published {published} events for {}", location.location_code)
            }
            ItemOutcome::Skip(reason) => report_skip(&ctx, &location.location_code, &reason),
            ItemOutcome::Fatal(err) => {
                ctx.fatal.trip(err);
                break;
            }
        }
    }

    debug!("fetch worker {id} stopped");
}

/// Fetch the forecast for a location and publish its events.
///
/// Yields the number of events published.
pub async fn fetch(ctx: &PipelineContext, location: &ResolvedLocation) -> ItemOutcome<usize> {
    let sample_count = location.day_count * SAMPLES_PER_DAY;

    let samples = match ctx
        .forecaster
        .forecast(location.latitude, location.longitude, sample_count)
        .await
    {
        Ok(samples) => samples,
        Err(err) => return ItemOutcome::from_provider_error(err),
    };
    PipelineStats::incr(&ctx.stats.fetched);

    let events = decompose(location, &samples);
    if events.len() < location.day_count as usize * 4 {
        warn!(
            "forecast for {} covers fewer than {} days",
            location.location_code, location.day_count
        );
    }

    let mut published = 0;
    for event in &events {
        let payload = match encode_event(event) {
            Ok(payload) => payload,
            Err(err) => return ItemOutcome::Skip(SkipReason::Publish(err)),
        };

        if let Err(err) = ctx
            .broker
            .publish(event.family().topic(), &event.key(), payload)
            .await
        {
            return ItemOutcome::Skip(SkipReason::Publish(err));
        }

        published += 1;
        PipelineStats::incr(&ctx.stats.events_published);
    }

    ItemOutcome::Success(published)
}

/// Split a forecast into four events per calendar day.
///
/// The first sample of each local date represents that day; at most
/// `day_count` days are kept.
pub fn decompose(location: &ResolvedLocation, samples: &[ForecastSample]) -> Vec<MetricEvent> {
    let mut days: Vec<NaiveDate> = Vec::new();
    let mut events = Vec::new();

    for sample in samples {
        let Some(date) = local_date(sample.timestamp) else {
            warn!("dropping sample with invalid timestamp {}", sample.timestamp);
            continue;
        };
        if days.contains(&date) {
            continue;
        }
        if days.len() >= location.day_count as usize {
            break;
        }
        days.push(date);

        events.extend(readings(sample).into_iter().map(|reading| MetricEvent {
            location_code: location.location_code.clone(),
            location_name: location.display_name.clone(),
            date,
            reading,
        }));
    }

    events
}

fn readings(sample: &ForecastSample) -> [Reading; 4] {
    [
        Reading::Temperature {
            temp: sample.temp,
            feels_like: sample.feels_like,
        },
        Reading::Humidity {
            humidity: sample.humidity,
        },
        Reading::Wind {
            speed: sample.wind_speed,
            degree: sample.wind_degree,
        },
        Reading::Cloud {
            cloud_percent: sample.cloud_percent,
        },
    ]
}
