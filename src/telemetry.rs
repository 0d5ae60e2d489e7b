use tracing_subscriber::EnvFilter;

/// Install the JSON tracing subscriber. `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_histogram!(
        "pipeline_job_duration_seconds",
        "Time from receiving a job to its terminal state"
    );
    metrics::describe_counter!(
        "pipeline_jobs_completed_total",
        "Jobs that reached COMPLETED"
    );
    metrics::describe_counter!("pipeline_jobs_failed_total", "Jobs that reached FAILED");
    metrics::describe_counter!(
        "pipeline_jobs_duplicate_total",
        "Completed jobs whose content hash was already stored"
    );
    metrics::describe_counter!(
        "pipeline_jobs_timed_out_total",
        "Deliveries abandoned after exceeding their time budget"
    );
    metrics::describe_counter!(
        "pipeline_messages_skipped_total",
        "Malformed queue messages that were skipped"
    );
    metrics::describe_counter!(
        "ingestion_jobs_enqueued_total",
        "Jobs enqueued from object-created events"
    );
    metrics::describe_gauge!("pipeline_queue_depth", "Messages waiting in the job queue");
}
