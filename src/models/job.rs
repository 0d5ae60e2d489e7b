use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Kind of media an object holds, inferred from its key at ingestion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaType {
    Audio,
    Text,
}

impl MediaType {
    /// Classify an object key by its extension. Unknown extensions are text.
    pub fn from_key(key: &str) -> Self {
        let ext = key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "mp3" | "wav" | "m4a" | "ogg" | "flac" => MediaType::Audio,
            _ => MediaType::Text,
        }
    }
}

/// Pipeline stage a job is in, as reported in lifecycle events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    Ingestion,
    Received,
    Fetching,
    Summarizing,
    Embedding,
    Persisting,
    Completed,
    Failed,
}

/// Wire format of a job message on the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    #[garde(length(min = 1, max = 256))]
    pub job_id: String,

    #[garde(length(min = 1, max = 255))]
    pub bucket: String,

    #[garde(length(min = 1, max = 1024))]
    pub key: String,

    #[garde(skip)]
    pub media_type: MediaType,

    #[garde(skip)]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub retry_count: Option<u32>,
}

/// Bucket/key pair locating a job's source object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub bucket: String,
    pub key: String,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// One delivery's view of a unit of work. Never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingJob {
    pub job_id: String,
    pub source: SourceLocation,
    pub media_type: MediaType,
    pub created_at: DateTime<Utc>,
    /// Advisory only; derived from the queue's receive count when absent.
    pub retry_count: u32,
}

impl ProcessingJob {
    pub fn from_message(message: JobMessage, receive_count: u32) -> Self {
        Self {
            job_id: message.job_id,
            source: SourceLocation {
                bucket: message.bucket,
                key: message.key,
            },
            media_type: message.media_type,
            created_at: message.created_at,
            retry_count: message
                .retry_count
                .unwrap_or_else(|| receive_count.saturating_sub(1)),
        }
    }
}
