use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use forecast_ingest::{
    broker,
    config::PipelineConfig,
    dedup::DedupGate,
    metrics::MetricsStore,
    pipeline::{Pipeline, PipelineContext},
    providers::openweather::OpenWeatherClient,
    readiness::{DashboardProbe, RETRY_INTERVAL, wait_for_broker},
    storage::DurableLog,
};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Input file with one `days|location` request per line
    #[arg(short, long, env = "FILE")]
    file: PathBuf,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("forecast_ingest", LevelFilter::DEBUG),
        ("ingest", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = PipelineConfig::from_env()?;

    let log = Arc::new(DurableLog::new(config.metrics_file.clone()));
    let metrics = Arc::new(
        MetricsStore::new(config.thresholds).context("failed to register metric families")?,
    );
    match metrics.replay(&log).await {
        Ok(applied) => info!("restored {applied} readings from {}", log.path().display()),
        Err(e) => warn!("could not replay {}: {e}", log.path().display()),
    }

    let dedup = Arc::new(DedupGate::with_strategy(log.clone(), config.dedup).await);
    let weather = Arc::new(
        OpenWeatherClient::new(&config.provider).context("failed to build the provider client")?,
    );
    let broker = broker::connect(&config.broker, config.broker_timeout)
        .context("failed to build the broker client")?;

    let stop = CancellationToken::new();
    #[cfg(feature = "exposition")]
    let server = {
        let server_stop = stop.clone();
        let (_, handle) = forecast_ingest::exposition::serve(
            config.metrics_addr,
            metrics.clone(),
            async move { server_stop.cancelled().await },
        )
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", config.metrics_addr))?;
        handle
    };

    wait_for_broker(broker.as_ref(), config.broker_wait, RETRY_INTERVAL)
        .await
        .context("broker is not available")?;
    DashboardProbe::new(config.grafana_url.as_str())
        .context("failed to build the dashboard probe client")?
        .wait(config.grafana_timeout, RETRY_INTERVAL)
        .await
        .context("dashboard service is not available")?;

    let ctx = Arc::new(PipelineContext::new(
        dedup,
        weather.clone(),
        weather,
        broker,
        metrics,
        log,
    ));
    let pipeline = Pipeline::start(ctx, config.workers)
        .await
        .context("failed to start the pipeline")?;

    let read_result = submit_file(&pipeline, &args.file).await;

    let (summary, _) = pipeline.finish().await?;
    read_result?;
    info!(
        "processed {} requests in {:?}",
        summary.requests, summary.elapsed
    );

    info!("press Ctrl-C to stop serving metrics");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    stop.cancel();

    #[cfg(feature = "exposition")]
    server.await.context("metrics server task failed")?;

    Ok(())
}

/// Feed every non-blank line of `path` into the pipeline
async fn submit_file(pipeline: &Pipeline, path: &Path) -> anyhow::Result<()> {
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut line = 0;

    while let Some(text) = lines
        .next_line()
        .await
        .with_context(|| format!("failed to read {}", path.display()))?
    {
        line += 1;
        if text.trim().is_empty() {
            continue;
        }
        if let Err(e) = pipeline.submit_line(&text, line).await {
            error!("stopping intake at line {line}: {e}");
            break;
        }
    }

    Ok(())
}
