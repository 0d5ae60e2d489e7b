//! Shared fakes and tracing capture for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use media_pipeline::db::results::{check_dimensions, PersistenceError, ResultStore};
use media_pipeline::models::record::{InsertOutcome, ResultRecord};
use media_pipeline::services::llm::{LanguageModel, LlmError};
use media_pipeline::services::processor::JobProcessor;
use media_pipeline::services::queue::{Delivery, LeaseQueue, QueueError, ReleaseOutcome};
use media_pipeline::services::retry::RetryPolicy;
use media_pipeline::services::storage::{ObjectStore, StorageError};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

pub const DIMENSIONS: usize = 1536;

/// In-memory object storage.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    delays: Mutex<HashMap<(String, String), Duration>>,
}

impl MemoryObjectStore {
    pub fn with_object(self, bucket: &str, key: &str, content: impl Into<Vec<u8>>) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), content.into());
        self
    }

    /// Make fetching this object take `delay`.
    pub fn with_slow_object(
        self,
        bucket: &str,
        key: &str,
        content: impl Into<Vec<u8>>,
        delay: Duration,
    ) -> Self {
        self.delays
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), delay);
        self.with_object(bucket, key, content)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let objects = self.objects.lock().unwrap();
        match objects.get(&(bucket.to_string(), key.to_string())) {
            None => Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Some(bytes) if bytes.is_empty() => Err(StorageError::ObjectEmpty {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Some(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Language model that plays back scripted replies, then falls back to a
/// fixed summary and a vector of the configured width.
pub struct ScriptedModel {
    summaries: Mutex<VecDeque<Result<String, LlmError>>>,
    embeddings: Mutex<VecDeque<Result<Vec<f32>, LlmError>>>,
    default_summary: String,
    default_width: usize,
    pub completion_inputs: Mutex<Vec<String>>,
    pub embedding_inputs: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            summaries: Mutex::new(VecDeque::new()),
            embeddings: Mutex::new(VecDeque::new()),
            default_summary: "A concise summary of the document.".to_string(),
            default_width: DIMENSIONS,
            completion_inputs: Mutex::new(Vec::new()),
            embedding_inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summary_replies(self, replies: Vec<Result<String, LlmError>>) -> Self {
        self.summaries.lock().unwrap().extend(replies);
        self
    }

    pub fn with_embedding_replies(self, replies: Vec<Result<Vec<f32>, LlmError>>) -> Self {
        self.embeddings.lock().unwrap().extend(replies);
        self
    }

    pub fn with_default_width(mut self, width: usize) -> Self {
        self.default_width = width;
        self
    }

    pub fn with_default_summary(mut self, summary: impl Into<String>) -> Self {
        self.default_summary = summary.into();
        self
    }

    /// Never succeeds at embedding.
    pub fn failing_embeddings(self) -> Self {
        let replies = (0..16).map(|_| Err(unavailable())).collect();
        self.with_embedding_replies(replies)
    }

    pub fn completion_calls(&self) -> usize {
        self.completion_inputs.lock().unwrap().len()
    }

    pub fn embedding_calls(&self) -> usize {
        self.embedding_inputs.lock().unwrap().len()
    }
}

pub fn unavailable() -> LlmError {
    LlmError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _system: &str, user: &str, _max_tokens: u32) -> Result<String, LlmError> {
        self.completion_inputs.lock().unwrap().push(user.to_string());
        let scripted = self.summaries.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_summary.clone()))
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, LlmError> {
        self.embedding_inputs.lock().unwrap().push(input.to_string());
        // Yield so concurrent jobs interleave like real network calls.
        tokio::task::yield_now().await;
        let scripted = self.embeddings.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(vec![0.01; self.default_width]))
    }
}

/// Result store enforcing a unique content hash, like the real schema.
pub struct MemoryResultStore {
    dimensions: usize,
    pub records: Mutex<Vec<ResultRecord>>,
}

impl MemoryResultStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<ResultRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn insert(&self, record: &ResultRecord) -> Result<InsertOutcome, PersistenceError> {
        check_dimensions(self.dimensions, &record.embedding)?;

        let mut records = self.records.lock().unwrap();
        if records.iter().any(|r| r.content_hash == record.content_hash) {
            return Ok(InsertOutcome::Duplicate);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }
}

/// Lease queue that records every settlement instead of talking to Redis.
pub struct MemoryLeaseQueue {
    max_receive_count: u32,
    lost: Mutex<HashSet<Uuid>>,
    fail_acks: bool,
    pub renewed: Mutex<Vec<Uuid>>,
    pub acked: Mutex<Vec<Uuid>>,
    pub released: Mutex<Vec<Uuid>>,
}

impl MemoryLeaseQueue {
    pub fn new(max_receive_count: u32) -> Self {
        Self {
            max_receive_count,
            lost: Mutex::new(HashSet::new()),
            fail_acks: false,
            renewed: Mutex::new(Vec::new()),
            acked: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    /// Every ack fails with a queue error.
    pub fn failing_acks(mut self) -> Self {
        self.fail_acks = true;
        self
    }

    /// Pretend the reclaimer already took this delivery back.
    pub fn expire(&self, delivery: &Delivery) {
        self.lost.lock().unwrap().insert(delivery.message_id);
    }

    pub fn acked(&self) -> Vec<Uuid> {
        self.acked.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<Uuid> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeaseQueue for MemoryLeaseQueue {
    async fn renew(&self, delivery: &Delivery) -> Result<bool, QueueError> {
        if self.lost.lock().unwrap().contains(&delivery.message_id) {
            return Ok(false);
        }
        self.renewed.lock().unwrap().push(delivery.message_id);
        Ok(true)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.fail_acks {
            let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection reset"));
            return Err(QueueError::Redis(err));
        }
        self.acked.lock().unwrap().push(delivery.message_id);
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<ReleaseOutcome, QueueError> {
        self.released.lock().unwrap().push(delivery.message_id);
        if delivery.receive_count >= self.max_receive_count {
            Ok(ReleaseOutcome::DeadLettered)
        } else {
            Ok(ReleaseOutcome::Requeued)
        }
    }
}

/// Everything a test needs to drive one processor.
pub struct Harness {
    pub storage: Arc<MemoryObjectStore>,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<MemoryResultStore>,
    pub processor: Arc<JobProcessor>,
}

impl Harness {
    pub fn new(storage: MemoryObjectStore, model: ScriptedModel) -> Self {
        Self::with_store(storage, model, MemoryResultStore::new(DIMENSIONS))
    }

    pub fn with_store(storage: MemoryObjectStore, model: ScriptedModel, store: MemoryResultStore) -> Self {
        let storage = Arc::new(storage);
        let model = Arc::new(model);
        let store = Arc::new(store);
        let processor = Arc::new(JobProcessor::new(
            storage.clone(),
            model.clone(),
            store.clone(),
            RetryPolicy::new(3, Duration::from_millis(1000)),
        ));
        Self {
            storage,
            model,
            store,
            processor,
        }
    }
}

/// A job message body in the queue's wire format.
pub fn job_body(job_id: &str, bucket: &str, key: &str, media_type: &str) -> String {
    serde_json::json!({
        "jobId": job_id,
        "bucket": bucket,
        "key": key,
        "mediaType": media_type,
        "createdAt": "2026-03-01T12:00:00.000Z",
    })
    .to_string()
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn message(&self) -> &str {
        self.field("message").unwrap_or("")
    }
}

/// Collects every event emitted while its guard is alive.
#[derive(Clone, Default)]
pub struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl EventCapture {
    /// Route events on this thread into the capture. Tests must use the
    /// current-thread runtime (the `#[tokio::test]` default).
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.events().into_iter().filter(|e| e.level == level).collect()
    }

    pub fn in_stage(&self, stage: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.field("stage") == Some(stage))
            .collect()
    }
}

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for EventCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = HashMap::new();
        event.record(&mut FieldVisitor(&mut fields));
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields,
        });
    }
}
