use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::models::job::{JobMessage, JobStage, MediaType};
use crate::services::queue::{JobQueue, QueueError};

/// S3-style object-created notification (AWS S3, MinIO and R2 share this shape).
#[derive(Debug, Deserialize)]
pub struct ObjectEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<ObjectEventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectEventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3Object,
}

#[derive(Debug, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3Object {
    pub key: String,
}

/// Object keys arrive form-encoded: `+` is a space, `%XX` an escaped byte.
pub fn decode_object_key(raw: &str) -> String {
    // Keep literal separators so the whole key parses as a single name.
    let escaped = raw.replace('&', "%26").replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

/// Turn an event into job messages for `media_bucket`. Records for other
/// buckets are logged and dropped.
pub fn jobs_from_event(event: &ObjectEvent, media_bucket: &str, now: DateTime<Utc>) -> Vec<JobMessage> {
    event
        .records
        .iter()
        .filter_map(|record| {
            let bucket = &record.s3.bucket.name;
            let key = decode_object_key(&record.s3.object.key);

            if bucket != media_bucket {
                tracing::warn!(bucket = %bucket, key = %key, "Ignoring event from non-configured bucket");
                return None;
            }
            if key.is_empty() {
                tracing::warn!(bucket = %bucket, "Ignoring event without an object key");
                return None;
            }

            Some(JobMessage {
                job_id: Uuid::new_v4().to_string(),
                bucket: bucket.clone(),
                media_type: MediaType::from_key(&key),
                key,
                created_at: now,
                retry_count: Some(0),
            })
        })
        .collect()
}

/// Enqueue one job per accepted record. Stops at the first queue failure so
/// the caller can retry the whole notification.
pub async fn enqueue_event(
    queue: &JobQueue,
    event: &ObjectEvent,
    media_bucket: &str,
) -> Result<Vec<String>, QueueError> {
    let mut job_ids = Vec::new();

    for message in jobs_from_event(event, media_bucket, Utc::now()) {
        tracing::info!(
            job_id = %message.job_id,
            stage = %JobStage::Ingestion,
            bucket = %message.bucket,
            key = %message.key,
            media_type = %message.media_type,
            "Enqueueing processing job"
        );

        let body = serde_json::to_string(&message)?;
        if let Err(e) = queue.send(&body).await {
            tracing::error!(
                job_id = %message.job_id,
                bucket = %message.bucket,
                key = %message.key,
                error = %e,
                "Failed to enqueue job"
            );
            return Err(e);
        }

        metrics::counter!("ingestion_jobs_enqueued_total").increment(1);
        tracing::info!(job_id = %message.job_id, stage = %JobStage::Ingestion, "Job enqueued successfully");
        job_ids.push(message.job_id);
    }

    Ok(job_ids)
}
