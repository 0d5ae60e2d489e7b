pub mod dispatch;
pub mod embed;
pub mod fingerprint;
pub mod ingestion;
pub mod llm;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod secrets;
pub mod storage;
pub mod summarize;
