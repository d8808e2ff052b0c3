//! Requests whose furthest day is already in the durable log

use std::time::Duration;

use forecast_ingest::dedup::DedupStrategy;
use forecast_ingest::pipeline::Pipeline;
use tokio::time::timeout;

use crate::helpers::{Fixture, day_offset, record};

const DEADLINE: Duration = Duration::from_secs(10);

async fn assert_observed_request_is_free(strategy: DedupStrategy) {
    let fixture = Fixture::new();
    fixture.seed(&[record("10001", &day_offset(2))]).await;
    let ctx = fixture.context(strategy).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    pipeline.submit_line("3|10001", 1).await.unwrap();
    let (summary, _) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.deduplicated, 1);
    assert_eq!(summary.events_published, 0);
    assert_eq!(fixture.geocoder.calls(), 0);
    assert_eq!(fixture.forecaster.calls(), 0);
    assert_eq!(fixture.log_lines(), 1);
}

#[tokio::test]
async fn test_scan_skips_observed_request() {
    assert_observed_request_is_free(DedupStrategy::Scan).await;
}

#[tokio::test]
async fn test_index_skips_observed_request() {
    assert_observed_request_is_free(DedupStrategy::Indexed).await;
}

#[tokio::test]
async fn test_only_the_furthest_day_counts() {
    let fixture = Fixture::new();
    // Today is logged, the furthest day of a two-day request is not
    fixture.seed(&[record("10001", &day_offset(0))]).await;
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    pipeline.submit_line("2|10001", 1).await.unwrap();
    let (summary, _) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.deduplicated, 0);
    assert_eq!(summary.events_published, 8);
    assert_eq!(fixture.forecaster.calls(), 1);
}

#[tokio::test]
async fn test_second_run_finds_first_run_records() {
    let fixture = Fixture::new();

    for expected_calls in [1, 1] {
        let ctx = fixture.context(DedupStrategy::Indexed).await;
        let pipeline = Pipeline::start(ctx, 2).await.unwrap();
        pipeline.submit_line("2|60601", 1).await.unwrap();
        timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

        assert_eq!(fixture.forecaster.calls(), expected_calls);
    }
    assert_eq!(fixture.log_lines(), 8);
}
