use std::sync::Arc;

use crate::services::queue::JobQueue;

/// Shared ingestion server state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub media_bucket: Arc<str>,
}

impl AppState {
    pub fn new(queue: JobQueue, media_bucket: &str) -> Self {
        Self {
            queue: Arc::new(queue),
            media_bucket: Arc::from(media_bucket),
        }
    }
}
