use std::sync::Arc;

use crate::models::job::JobStage;
use crate::services::llm::LanguageModel;
use crate::services::processor::ProcessingError;
use crate::services::retry::{with_retry, RetryPolicy};

/// Character budget for content submitted for summarization.
pub const SUMMARY_INPUT_CHARS: usize = 12_000;

/// Token ceiling for the generated summary.
pub const SUMMARY_MAX_TOKENS: u32 = 256;

const SYSTEM_PROMPT: &str =
    "Summarize the following text concisely in 2-4 sentences. Output only the summary, no preamble.";

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Produces a short summary of source content through the language model.
pub struct SummarizationStage {
    llm: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
}

impl SummarizationStage {
    pub fn new(llm: Arc<dyn LanguageModel>, policy: RetryPolicy) -> Self {
        Self { llm, policy }
    }

    pub async fn summarize(&self, content: &str, job_id: &str) -> Result<String, ProcessingError> {
        let input = truncate_chars(content, SUMMARY_INPUT_CHARS);

        with_retry(&self.policy, job_id, JobStage::Summarizing, || {
            self.llm.complete(SYSTEM_PROMPT, input, SUMMARY_MAX_TOKENS)
        })
        .await
        .map_err(|cause| ProcessingError::SummarizationFailed {
            job_id: job_id.to_string(),
            cause,
        })
    }
}
