use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::metrics::{HealthSnapshot, MetricsSnapshot, StatusHandle};

pub fn router(status: Arc<StatusHandle>, path: &str) -> Router {
  Router::new()
    .route(path, get(health))
    .route("/metrics-json", get(metrics_json))
    .with_state(status)
}

/// Serves the health endpoint until cancellation.
pub async fn serve(config: ServerConfig, status: Arc<StatusHandle>, cancel: CancellationToken) -> io::Result<()> {
  let port = if config.port == 0 { 8080 } else { config.port };
  let path = if config.path.is_empty() {
    "/health".to_string()
  } else {
    config.path
  };

  let app = router(status, &path);
  let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
  info!(port, path = %path, "starting health check server");

  axum::serve(listener, app)
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
}

async fn health(State(status): State<Arc<StatusHandle>>) -> (StatusCode, Json<HealthSnapshot>) {
  let snapshot = status.health();
  let code = if status.healthy() {
    StatusCode::OK
  } else {
    StatusCode::SERVICE_UNAVAILABLE
  };
  (code, Json(snapshot))
}

async fn metrics_json(State(status): State<Arc<StatusHandle>>) -> Json<MetricsSnapshot> {
  Json(status.metrics())
}
