//! HTTP exposition of the metrics store
//!
//! Serves `GET /metrics` in the Prometheus text format for the scraper that
//! feeds the dashboards.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::metrics::MetricsStore;

pub fn router(store: Arc<MetricsStore>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(store)
}

/// GET /metrics
async fn render_metrics(State(store): State<Arc<MetricsStore>>) -> Response {
    match store.render() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(e) => {
            error!("failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Bind `addr` and serve the metrics endpoint until `shutdown` resolves.
///
/// Returns the bound address and the server task.
pub async fn serve<F>(
    addr: SocketAddr,
    store: Arc<MetricsStore>,
    shutdown: F,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("serving metrics on http://{local_addr}/metrics");

    let app = router(store);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("metrics server error: {e}");
        }
    });

    Ok((local_addr, handle))
}
