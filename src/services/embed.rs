use std::sync::Arc;

use crate::models::job::JobStage;
use crate::services::llm::LanguageModel;
use crate::services::processor::ProcessingError;
use crate::services::retry::{with_retry, RetryPolicy};
use crate::services::summarize::truncate_chars;

/// Character budget for text submitted for embedding.
pub const EMBEDDING_INPUT_CHARS: usize = 8_000;

/// Turns a summary into a fixed-width vector. The width is checked by the
/// result store, not here.
pub struct EmbeddingStage {
    llm: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
}

impl EmbeddingStage {
    pub fn new(llm: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }

    pub async fn embed(&self, text: &str, job_id: &str) -> Result<Vec<f32>, ProcessingError> {
        let input = truncate_chars(text, EMBEDDING_INPUT_CHARS);

        with_retry(&self.policy, job_id, JobStage::Embedding, || self.llm.embed(input))
            .await
            .map_err(|cause| ProcessingError::EmbeddingFailed {
                job_id: job_id.to_string(),
                cause,
            })
    }
}
