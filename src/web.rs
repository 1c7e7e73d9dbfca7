//! HTTP ingestion endpoint and operational routes.
//!
//! Phone protocols report over HTTP instead of a raw socket. The root route
//! feeds the OsmAnd dispatcher; `/metrics` exposes the Prometheus scrape
//! endpoint and `/health` a liveness probe. Requests always get `200 OK`
//! back: the device cannot do anything useful with an error status, and
//! failures are already logged and counted on the server side.

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::protocol::{Frame, HttpFrame};
use crate::session::Connection;

#[derive(Clone)]
struct AppState {
    dispatcher: Arc<Dispatcher>,
    metrics: PrometheusHandle,
}

async fn handle_report(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    body: String,
) -> impl IntoResponse {
    let frame = Frame::Http(HttpFrame {
        query: query.unwrap_or_default(),
        body,
    });
    // HTTP reports are self-identifying, so each request gets a fresh
    // stateless connection.
    let mut connection = Connection::stateless();
    state.dispatcher.dispatch(&mut connection, &frame).await;
    StatusCode::OK
}

async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

async fn handle_health() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn start_web_server(
    bind: SocketAddr,
    dispatcher: Dispatcher,
    metrics: PrometheusHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        metrics,
    };

    let app = Router::new()
        .route("/", get(handle_report).post(handle_report))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding web server on {bind}"))?;
    info!(%bind, "web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
