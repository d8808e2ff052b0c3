//! Startup readiness waits for infrastructure the pipeline depends on
//!
//! Availability errors are retried at a fixed interval until an overall
//! deadline passes; after that the caller treats them as fatal. A probe that
//! hangs is cut off at the deadline as well.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::broker::Broker;

/// Default delay between readiness probes
pub const RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound for a single dashboard health request
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct NotReady {
    pub service: String,
    pub waited: Duration,
    pub last_error: String,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} did not become ready within {:?}: {}",
            self.service, self.waited, self.last_error
        )
    }
}

impl std::error::Error for NotReady {}

/// Probe `check` every `retry` until it succeeds or `timeout` elapses.
///
/// Each probe only gets the time left before the deadline.
pub async fn wait_until_ready<F, Fut, E>(
    service: &str,
    timeout: Duration,
    retry: Duration,
    mut check: F,
) -> Result<(), NotReady>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let start = Instant::now();

    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        let last_error = match tokio::time::timeout(remaining, check()).await {
            Ok(Ok(())) => {
                info!("{service} is up and ready");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("check timed out after {remaining:?}"),
        };

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(NotReady {
                service: service.to_string(),
                waited,
                last_error,
            });
        }

        debug!("waiting for {service} to start: {last_error}");
        tokio::time::sleep(retry.min(timeout - waited)).await;
    }
}

/// Wait for the broker to accept requests
pub async fn wait_for_broker(
    broker: &dyn Broker,
    timeout: Duration,
    retry: Duration,
) -> Result<(), NotReady> {
    wait_until_ready("broker", timeout, retry, || broker.ready()).await
}

/// Health probe for the dashboard-provisioning service
#[derive(Debug, Clone)]
pub struct DashboardProbe {
    client: Client,
    base_url: String,
}

impl DashboardProbe {
    pub fn new(base_url: impl Into<String>) -> reqwest::Result<Self> {
        Self::with_timeout(base_url, PROBE_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// One probe of `/api/health`; 200 or 401 (login required) count as up.
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .get(format!("{}/api/health", self.base_url))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        match response.status() {
            StatusCode::OK | StatusCode::UNAUTHORIZED => Ok(()),
            status => Err(format!("health endpoint returned {status}")),
        }
    }

    pub async fn wait(&self, timeout: Duration, retry: Duration) -> Result<(), NotReady> {
        wait_until_ready("dashboard service", timeout, retry, || self.check()).await
    }
}
