use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::ingestion::{self, ObjectEvent};

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_ids: Vec<String>,
}

/// POST /api/v1/events: accept an object-created notification and enqueue
/// one processing job per object in the media bucket.
pub async fn object_created(
    State(state): State<AppState>,
    Json(event): Json<ObjectEvent>,
) -> Result<(StatusCode, Json<EnqueueResponse>), StatusCode> {
    let job_ids = ingestion::enqueue_event(&state.queue, &event, &state.media_bucket)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_ids })))
}
