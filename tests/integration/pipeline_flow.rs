//! End-to-end runs through every pool with in-process providers

use std::time::Duration;

use forecast_ingest::MetricFamily;
use forecast_ingest::dedup::DedupStrategy;
use forecast_ingest::metrics::{Alert, MetricsStore};
use forecast_ingest::config::AlertThresholds;
use forecast_ingest::pipeline::{Phase, Pipeline};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use crate::helpers::{Fixture, day_offset};

const DEADLINE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_three_day_request_reaches_gauges_and_log() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 4).await.unwrap();
    pipeline.submit_line("3|10001", 1).await.unwrap();
    let (summary, report) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.requests, 1);
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.events_published, 12);
    assert_eq!(summary.messages_consumed, 12);
    assert_eq!(summary.samples_aggregated, 12);
    assert_eq!(summary.closed_sends, 0);
    assert_eq!(report.phases.last(), Some(&Phase::Stopped));

    for family in MetricFamily::ALL {
        assert_eq!(fixture.broker.topic_len(family.topic()).unwrap(), 3);
    }

    for day in 0..3u64 {
        let date = day_offset(day);
        assert_eq!(
            fixture.metrics.value("temperature", "10001", &date),
            Some(60.0 + day as f64)
        );
        assert_eq!(fixture.metrics.value("humidity", "10001", &date), Some(55.0));
        assert_eq!(fixture.metrics.value("wind_speed", "10001", &date), Some(8.0));
        assert_eq!(fixture.metrics.value("cloud_percent", "10001", &date), Some(35.0));
        assert_eq!(
            fixture.metrics.alert(Alert::HumidityHigh, "10001", &date),
            Some(false)
        );
    }
    assert_eq!(fixture.metrics.series_count("temperature"), 3);

    assert_eq!(fixture.log_lines(), 12);
    assert_eq!(fixture.geocoder.calls(), 1);
    assert_eq!(fixture.forecaster.calls(), 1);
}

#[tokio::test]
async fn test_many_requests_with_one_worker_per_pool() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 1).await.unwrap();
    for (line, zip) in (1..).zip(["10001", "60601", "94103", "73301", "98101"]) {
        pipeline.submit_line(&format!("2|{zip}"), line).await.unwrap();
    }
    let (summary, _) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.requests, 5);
    assert_eq!(summary.events_published, 40);
    assert_eq!(summary.samples_aggregated, 40);
    assert_eq!(summary.closed_sends, 0);
    assert_eq!(fixture.log_lines(), 40);
    assert_eq!(fixture.metrics.series_count("wind_degree"), 10);
}

#[tokio::test]
async fn test_log_replay_restores_gauges() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    pipeline.submit_line("1|10001", 1).await.unwrap();
    timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    let restarted = MetricsStore::new(AlertThresholds::default()).unwrap();
    assert_eq!(restarted.replay(&fixture.log).await.unwrap(), 4);

    let today = day_offset(0);
    for gauge in ["temperature", "feelslike", "humidity", "wind_speed", "cloud_percent"] {
        assert_eq!(
            restarted.value(gauge, "10001", &today),
            fixture.metrics.value(gauge, "10001", &today),
            "{gauge} differs after replay"
        );
    }
}
