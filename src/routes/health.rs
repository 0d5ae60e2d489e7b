use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub redis: ComponentHealth,
    pub queue: Option<QueueStats>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub dead_lettered: u64,
}

/// GET /health: Redis connectivity plus queue depths.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let redis = match state.queue.health_check().await {
        Ok(_) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Redis health check failed");
            ComponentHealth {
                status: "error".to_string(),
                latency_ms: None,
            }
        }
    };

    let healthy = redis.status == "ok";
    let queue = if healthy { queue_stats(&state).await } else { None };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { redis, queue },
    };

    (status_code, Json(response))
}

async fn queue_stats(state: &AppState) -> Option<QueueStats> {
    let pending = state.queue.depth().await.ok()?;
    metrics::gauge!("pipeline_queue_depth").set(pending as f64);

    Some(QueueStats {
        pending,
        in_flight: state.queue.in_flight().await.ok()?,
        dead_lettered: state.queue.dead_letter_depth().await.ok()?,
    })
}
