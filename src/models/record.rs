use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::job::ProcessingJob;

/// Open, order-irrelevant metadata stored alongside a result.
pub type Metadata = Map<String, Value>;

/// Persisted outcome of one successful processing attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub job_id: String,
    pub content_hash: String,
    pub summary: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn metadata_for(job: &ProcessingJob) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("bucket".into(), Value::String(job.source.bucket.clone()));
        metadata.insert("key".into(), Value::String(job.source.key.clone()));
        metadata.insert("mediaType".into(), Value::String(job.media_type.to_string()));
        metadata
    }
}

/// What the store did with an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A record with the same content hash already exists.
    Duplicate,
}
