//! Phase-sequenced shutdown under different workloads

use std::time::Duration;

use forecast_ingest::dedup::DedupStrategy;
use forecast_ingest::pipeline::{Phase, Pipeline};
use pretty_assertions::assert_eq;
use tokio::time::timeout;

use crate::helpers::Fixture;

const DEADLINE: Duration = Duration::from_secs(10);

const ALL_PHASES: [Phase; 6] = [
    Phase::ProducersOpen,
    Phase::DedupStageClosing,
    Phase::FetchStageClosing,
    Phase::BrokerDrain,
    Phase::AggregationDrain,
    Phase::Stopped,
];

#[tokio::test]
async fn test_zero_requests() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 3).await.unwrap();
    assert_eq!(pipeline.phase(), Phase::ProducersOpen);
    let (summary, report) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(report.phases, ALL_PHASES.to_vec());
    assert_eq!(summary.requests, 0);
    assert_eq!(summary.closed_sends, 0);
    assert_eq!(fixture.log_lines(), 0);
}

#[tokio::test]
async fn test_all_requests_invalid() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    for (line, text) in (1..).zip(["abc|10001", "0|10001", "3", "3|10001|x", "2| "]) {
        pipeline.submit_line(text, line).await.unwrap();
    }
    let (summary, report) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(report.phases, ALL_PHASES.to_vec());
    assert_eq!(summary.invalid_lines, 5);
    assert_eq!(summary.requests, 0);
    assert_eq!(fixture.geocoder.calls(), 0);
    assert_eq!(fixture.forecaster.calls(), 0);
}

#[tokio::test]
async fn test_drains_everything_published_before_stopping() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 8).await.unwrap();
    for line in 1..=20 {
        pipeline
            .submit_line(&format!("5|{}", 10000 + line), line)
            .await
            .unwrap();
    }
    let (summary, report) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(report.phases, ALL_PHASES.to_vec());
    assert_eq!(summary.events_published, 400);
    assert_eq!(summary.messages_consumed, 400);
    assert_eq!(summary.samples_aggregated, 400);
    assert_eq!(summary.closed_sends, 0);
    assert_eq!(fixture.log_lines(), 400);
}
