//! Skips, fatal aborts and what they leave behind

use std::time::Duration;

use assert_matches::assert_matches;
use forecast_ingest::dedup::DedupStrategy;
use forecast_ingest::pipeline::{Pipeline, PipelineError};
use forecast_ingest::providers::ProviderError;
use tokio::time::timeout;

use crate::helpers::Fixture;

const DEADLINE: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_invalid_key_aborts_the_run() {
    let fixture = Fixture::new();
    fixture
        .geocoder
        .fail_with(ProviderError::InvalidCredentials("Invalid API key".into()));
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx.clone(), 2).await.unwrap();
    for line in 1..=10 {
        if pipeline
            .submit_line(&format!("1|{}", 20000 + line), line)
            .await
            .is_err()
        {
            break;
        }
    }
    let result = timeout(DEADLINE, pipeline.finish()).await.unwrap();

    assert_matches!(
        result,
        Err(PipelineError::Fatal(ProviderError::InvalidCredentials(_)))
    );
    assert!(ctx.fatal.is_tripped());
    assert_eq!(fixture.forecaster.calls(), 0);
    assert_eq!(fixture.log_lines(), 0);
}

#[tokio::test]
async fn test_unknown_location_is_skipped() {
    let fixture = Fixture::new();
    fixture.geocoder.mark_unknown("00000");
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    pipeline.submit_line("1|00000", 1).await.unwrap();
    pipeline.submit_line("1|10001", 2).await.unwrap();
    let (summary, _) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.requests, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.events_published, 4);
    assert_eq!(fixture.forecaster.calls(), 1);
    assert_eq!(fixture.log_lines(), 4);
}

#[tokio::test]
async fn test_non_numeric_days_has_no_side_effects() {
    let fixture = Fixture::new();
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    pipeline.submit_line("abc|10001", 1).await.unwrap();
    let (summary, _) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.invalid_lines, 1);
    assert_eq!(summary.events_published, 0);
    assert_eq!(fixture.geocoder.calls(), 0);
    assert_eq!(fixture.metrics.series_count("temperature"), 0);
    assert_eq!(fixture.log_lines(), 0);
}

#[tokio::test]
async fn test_transport_error_skips_only_that_request() {
    let fixture = Fixture::new();
    fixture
        .geocoder
        .fail_with(ProviderError::Transport("connection reset by peer".into()));
    let ctx = fixture.context(DedupStrategy::Scan).await;

    let pipeline = Pipeline::start(ctx, 2).await.unwrap();
    pipeline.submit_line("2|10001", 1).await.unwrap();
    pipeline.submit_line("2|60601", 2).await.unwrap();
    let (summary, _) = timeout(DEADLINE, pipeline.finish()).await.unwrap().unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.events_published, 0);
}
