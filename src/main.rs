use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;

use media_pipeline::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::queue::{JobQueue, DEFAULT_QUEUE_NAME},
    telemetry,
};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing media-pipeline ingestion server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    telemetry::describe_metrics();

    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(
        &config.redis_url,
        DEFAULT_QUEUE_NAME,
        config.visibility_timeout(),
        config.max_receive_count,
    )
    .expect("Failed to initialize job queue");

    let state = AppState::new(queue, &config.media_bucket);
    let app = routes::router(state, prometheus_handle);

    tracing::info!(media_bucket = %config.media_bucket, "Starting ingestion on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
