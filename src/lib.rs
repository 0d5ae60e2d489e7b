//! Media processing pipeline
//!
//! Objects dropped into storage become queued jobs. The worker fetches each
//! job's source, summarizes and embeds it through an OpenAI-compatible API,
//! fingerprints the content and stores the result in a pgvector table.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
