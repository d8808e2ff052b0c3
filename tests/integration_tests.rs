//! Integration tests for the ingestion pipeline

#[path = "integration/helpers.rs"]
mod helpers;

#[path = "integration/pipeline_flow.rs"]
mod pipeline_flow;

#[path = "integration/dedup_scenarios.rs"]
mod dedup_scenarios;

#[path = "integration/shutdown.rs"]
mod shutdown;

#[path = "integration/failure_scenarios.rs"]
mod failure_scenarios;
