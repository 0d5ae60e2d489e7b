use serde::Deserialize;
use std::time::Duration;

use crate::db::DatabaseSource;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Ingestion server bind address (e.g., "0.0.0.0:3000"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Bucket whose object-created events are accepted by ingestion
    pub media_bucket: String,

    /// S3-compatible endpoint URL
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// S3 access key ID
    pub s3_access_key: String,

    /// S3 secret access key
    pub s3_secret_key: String,

    /// PostgreSQL connection string. Takes precedence over `db_secret_ref`.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Secret reference holding database credentials (JSON)
    #[serde(default)]
    pub db_secret_ref: Option<String>,

    /// Host override applied to secret-resolved credentials
    #[serde(default)]
    pub db_host: Option<String>,

    #[serde(default = "default_db_name")]
    pub db_name: String,

    #[serde(default)]
    pub openai_api_key: Option<String>,

    /// Secret reference holding the OpenAI API key
    #[serde(default)]
    pub openai_secret_ref: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Vector width expected by the `embeddings.embedding` column
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    #[serde(default = "default_llm_max_attempts")]
    pub llm_max_attempts: u32,

    #[serde(default = "default_llm_retry_base_delay_ms")]
    pub llm_retry_base_delay_ms: u64,

    #[serde(default = "default_llm_request_timeout_secs")]
    pub llm_request_timeout_secs: u64,

    /// Lease length for a received message; also the per-job time budget
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Deliveries allowed before a message is dead-lettered
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_receive_batch_size")]
    pub receive_batch_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Worker Prometheus listener address (e.g., "0.0.0.0:9100")
    #[serde(default)]
    pub metrics_addr: Option<String>,

    #[serde(default)]
    pub run_migrations: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_db_name() -> String {
    "mediapipeline".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_summary_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_llm_max_attempts() -> u32 {
    3
}

fn default_llm_retry_base_delay_ms() -> u64 {
    1000
}

fn default_llm_request_timeout_secs() -> u64 {
    60
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_max_receive_count() -> u32 {
    3
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_receive_batch_size() -> usize {
    10
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    /// Where the result store's credentials come from.
    pub fn database_source(&self) -> Result<DatabaseSource, ConfigError> {
        if let Some(url) = &self.database_url {
            return Ok(DatabaseSource::Url(url.clone()));
        }

        match &self.db_secret_ref {
            Some(reference) => Ok(DatabaseSource::Secret {
                reference: reference.clone(),
                host: self.db_host.clone(),
                database: Some(self.db_name.clone()),
            }),
            None => Err(ConfigError::MissingDatabase),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.llm_max_attempts,
            Duration::from_millis(self.llm_retry_base_delay_ms),
        )
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Either DATABASE_URL or DB_SECRET_REF must be set")]
    MissingDatabase,
}
