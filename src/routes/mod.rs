use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod events;
pub mod health;

/// Object notifications are small; anything bigger is not an event.
const MAX_EVENT_BODY_BYTES: usize = 1024 * 1024;

/// Build the ingestion server router.
pub fn router(state: AppState, prometheus: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/events", post(events::object_created))
        .with_state(state)
        .route("/metrics", get(prometheus_metrics).with_state(prometheus))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_EVENT_BODY_BYTES))
}

/// GET /metrics: Prometheus text exposition.
async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
