use async_trait::async_trait;
use pgvector::Vector;
use std::sync::Arc;

use crate::db::{ConnectError, DatabaseSource, StoreConnector};
use crate::models::record::{InsertOutcome, ResultRecord};

/// Durable sink for processing results.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert(&self, record: &ResultRecord) -> Result<InsertOutcome, PersistenceError>;
}

/// Reject vectors whose width does not match the schema. Never pads or truncates.
pub fn check_dimensions(expected: usize, embedding: &[f32]) -> Result<(), PersistenceError> {
    if embedding.len() != expected {
        return Err(PersistenceError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// pgvector-backed result store. The pool is fetched from the shared
/// connector on each insert, so it is opened on first use.
pub struct PgResultStore {
    connector: Arc<StoreConnector>,
    source: DatabaseSource,
    dimensions: usize,
}

impl PgResultStore {
    pub fn new(connector: Arc<StoreConnector>, source: DatabaseSource, dimensions: usize) -> Self {
        Self {
            connector,
            source,
            dimensions,
        }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn insert(&self, record: &ResultRecord) -> Result<InsertOutcome, PersistenceError> {
        check_dimensions(self.dimensions, &record.embedding)?;

        let pool = self.connector.pool(&self.source).await?;
        let metadata = serde_json::Value::Object(record.metadata.clone());

        let result = sqlx::query(
            r#"
            INSERT INTO embeddings (job_id, content_hash, summary, embedding, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.content_hash)
        .bind(&record.summary)
        .bind(Vector::from(record.embedding.clone()))
        .bind(metadata)
        .bind(record.created_at)
        .execute(&pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Embedding has {actual} dimensions, schema expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Could not reach result store: {0}")]
    Connect(#[from] ConnectError),

    #[error("Result store write failed: {0}")]
    Database(#[from] sqlx::Error),
}
