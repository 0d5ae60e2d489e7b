//! Per-message job state machine.
//!
//! A job moves `RECEIVED -> FETCHING -> SUMMARIZING -> EMBEDDING -> PERSISTING
//! -> COMPLETED`, and drops to `FAILED` from any stage. Each stage must finish
//! before the next begins. A redelivered message starts over from the top;
//! nothing is carried between deliveries.

use garde::Validate;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::results::{PersistenceError, ResultStore};
use crate::models::job::{JobMessage, JobStage, ProcessingJob};
use crate::models::record::{InsertOutcome, ResultRecord};
use crate::services::embed::EmbeddingStage;
use crate::services::fingerprint::fingerprint;
use crate::services::llm::{LanguageModel, LlmError};
use crate::services::queue::Delivery;
use crate::services::retry::{RetryError, RetryPolicy};
use crate::services::storage::{ObjectStore, StorageError};
use crate::services::summarize::SummarizationStage;

/// Successful run of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingReport {
    pub job_id: String,
    pub content_hash: String,
    pub outcome: InsertOutcome,
    pub duration: Duration,
}

/// What happened to one message of a batch.
#[derive(Debug)]
pub enum MessageOutcome {
    Completed(ProcessingReport),
    /// Unparseable message; acknowledging it is the only sensible thing.
    Skipped(ProcessingError),
    /// Hand back to the queue for redelivery or dead-lettering.
    Failed(ProcessingError),
}

impl MessageOutcome {
    pub fn should_ack(&self) -> bool {
        !matches!(self, MessageOutcome::Failed(_))
    }
}

pub struct JobProcessor {
    storage: Arc<dyn ObjectStore>,
    summarizer: SummarizationStage,
    embedder: EmbeddingStage,
    store: Arc<dyn ResultStore>,
}

impl JobProcessor {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn ResultStore>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            summarizer: SummarizationStage::new(llm.clone(), policy),
            embedder: EmbeddingStage::new(llm, policy),
            store,
        }
    }

    /// Decode and validate a raw queue message body.
    pub fn parse_message(body: &str, receive_count: u32) -> Result<ProcessingJob, ProcessingError> {
        let message: JobMessage =
            serde_json::from_str(body).map_err(|e| ProcessingError::Input(e.to_string()))?;
        message
            .validate()
            .map_err(|e| ProcessingError::Input(e.to_string()))?;
        Ok(ProcessingJob::from_message(message, receive_count))
    }

    /// Handle deliveries one after another. A bad message never stops the
    /// rest of the batch.
    pub async fn handle_batch(&self, deliveries: &[Delivery]) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            outcomes.push(self.handle_delivery(delivery).await);
        }
        outcomes
    }

    pub async fn handle_delivery(&self, delivery: &Delivery) -> MessageOutcome {
        let job = match Self::parse_message(&delivery.body, delivery.receive_count) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(
                    message_id = %delivery.message_id,
                    error = %e,
                    "Invalid queue message body"
                );
                metrics::counter!("pipeline_messages_skipped_total").increment(1);
                return MessageOutcome::Skipped(e);
            }
        };

        match self.process(&job).await {
            Ok(report) => MessageOutcome::Completed(report),
            Err(e) => MessageOutcome::Failed(e),
        }
    }

    /// Run one job to a terminal state. The originating error is returned
    /// unchanged on failure so the queue can apply its redelivery policy.
    pub async fn process(&self, job: &ProcessingJob) -> Result<ProcessingReport, ProcessingError> {
        let start = Instant::now();

        tracing::info!(
            job_id = %job.job_id,
            stage = %JobStage::Received,
            bucket = %job.source.bucket,
            key = %job.source.key,
            media_type = %job.media_type,
            retry_count = job.retry_count,
            "Starting processing"
        );

        match self.run(job).await {
            Ok((content_hash, outcome)) => {
                let duration = start.elapsed();
                metrics::histogram!("pipeline_job_duration_seconds").record(duration.as_secs_f64());
                metrics::counter!("pipeline_jobs_completed_total").increment(1);
                if outcome == InsertOutcome::Duplicate {
                    metrics::counter!("pipeline_jobs_duplicate_total").increment(1);
                }

                tracing::info!(
                    job_id = %job.job_id,
                    stage = %JobStage::Completed,
                    bucket = %job.source.bucket,
                    key = %job.source.key,
                    duplicate = outcome == InsertOutcome::Duplicate,
                    duration_ms = duration.as_millis() as u64,
                    "Processing completed"
                );

                Ok(ProcessingReport {
                    job_id: job.job_id.clone(),
                    content_hash,
                    outcome,
                    duration,
                })
            }
            Err(e) => {
                metrics::counter!("pipeline_jobs_failed_total").increment(1);

                tracing::error!(
                    job_id = %job.job_id,
                    stage = %JobStage::Failed,
                    failed_stage = %e.stage(),
                    bucket = %job.source.bucket,
                    key = %job.source.key,
                    retry_count = job.retry_count,
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Processing failed"
                );

                Err(e)
            }
        }
    }

    async fn run(&self, job: &ProcessingJob) -> Result<(String, InsertOutcome), ProcessingError> {
        let job_id = job.job_id.as_str();

        enter(job_id, JobStage::Fetching);
        let bytes = self
            .storage
            .get(&job.source.bucket, &job.source.key)
            .await
            .map_err(|source| ProcessingError::Fetch {
                job_id: job_id.to_string(),
                source,
            })?;

        // Hash the untouched bytes; stages only ever see truncated text.
        let content_hash = fingerprint(&bytes);
        let content = String::from_utf8_lossy(&bytes);

        enter(job_id, JobStage::Summarizing);
        let summary = self.summarizer.summarize(&content, job_id).await?;

        enter(job_id, JobStage::Embedding);
        let embedding = self.embedder.embed(&summary, job_id).await?;

        enter(job_id, JobStage::Persisting);
        let record = ResultRecord {
            job_id: job.job_id.clone(),
            content_hash: content_hash.clone(),
            summary,
            embedding,
            metadata: ResultRecord::metadata_for(job),
            created_at: chrono::Utc::now(),
        };
        let outcome = self
            .store
            .insert(&record)
            .await
            .map_err(|source| ProcessingError::Persistence {
                job_id: job_id.to_string(),
                source,
            })?;

        if outcome == InsertOutcome::Duplicate {
            tracing::info!(
                job_id,
                content_hash = %content_hash,
                "Result for identical content already stored"
            );
        }

        Ok((content_hash, outcome))
    }
}

fn enter(job_id: &str, stage: JobStage) {
    tracing::info!(job_id, stage = %stage, "Entering stage");
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Malformed job message: {0}")]
    Input(String),

    #[error("Failed to fetch source for job {job_id}: {source}")]
    Fetch {
        job_id: String,
        #[source]
        source: StorageError,
    },

    #[error("Summarization failed for job {job_id}: {cause}")]
    SummarizationFailed {
        job_id: String,
        #[source]
        cause: RetryError<LlmError>,
    },

    #[error("Embedding failed for job {job_id}: {cause}")]
    EmbeddingFailed {
        job_id: String,
        #[source]
        cause: RetryError<LlmError>,
    },

    #[error("Failed to persist result for job {job_id}: {source}")]
    Persistence {
        job_id: String,
        #[source]
        source: PersistenceError,
    },
}

impl ProcessingError {
    /// Stage the job was in when this error occurred.
    pub fn stage(&self) -> JobStage {
        match self {
            ProcessingError::Input(_) => JobStage::Received,
            ProcessingError::Fetch { .. } => JobStage::Fetching,
            ProcessingError::SummarizationFailed { .. } => JobStage::Summarizing,
            ProcessingError::EmbeddingFailed { .. } => JobStage::Embedding,
            ProcessingError::Persistence { .. } => JobStage::Persisting,
        }
    }

    /// Malformed input can never succeed, so it is skipped instead of redelivered.
    pub fn is_skippable(&self) -> bool {
        matches!(self, ProcessingError::Input(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_json_body_is_input_error() {
        let err = JobProcessor::parse_message("not json at all", 1).unwrap_err();
        assert!(err.is_skippable());
        assert_eq!(err.stage(), JobStage::Received);
    }

    #[test]
    fn missing_fields_are_input_errors() {
        let err = JobProcessor::parse_message(r#"{"jobId":"j1","bucket":"b"}"#, 1).unwrap_err();
        assert!(matches!(err, ProcessingError::Input(_)));
    }

    #[test]
    fn unknown_media_type_is_input_error() {
        let body = r#"{"jobId":"j1","bucket":"b","key":"k","mediaType":"video",
            "createdAt":"2026-01-02T03:04:05Z"}"#;
        assert!(JobProcessor::parse_message(body, 1).is_err());
    }

    #[test]
    fn blank_key_fails_validation() {
        let body = r#"{"jobId":"j1","bucket":"b","key":"","mediaType":"text",
            "createdAt":"2026-01-02T03:04:05Z"}"#;
        assert!(matches!(
            JobProcessor::parse_message(body, 1),
            Err(ProcessingError::Input(_))
        ));
    }

    #[test]
    fn failures_other_than_input_are_redelivered() {
        let err = ProcessingError::Persistence {
            job_id: "j1".into(),
            source: PersistenceError::DimensionMismatch {
                expected: 1536,
                actual: 3,
            },
        };
        assert!(!err.is_skippable());
        assert_eq!(err.stage(), JobStage::Persisting);
        assert!(!MessageOutcome::Failed(err).should_ack());
    }
}
