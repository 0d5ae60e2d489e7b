use media_pipeline::{
    config::AppConfig,
    db::{self, results::PgResultStore, StoreConnector},
    services::{
        dispatch::{BatchDispatcher, ShutdownSignal},
        llm::OpenAiClient,
        processor::JobProcessor,
        queue::{JobQueue, DEFAULT_QUEUE_NAME},
        secrets::{self, EnvSecretsProvider, SecretsProvider},
        storage::S3ObjectStore,
    },
    telemetry,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

const RECLAIM_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Clone, Copy)]
struct LoopSettings {
    batch_size: usize,
    poll_interval: Duration,
}

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    tracing::info!("Starting media-pipeline worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        telemetry::describe_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    // Initialize services
    tracing::info!("Initializing services");
    let secrets: Arc<dyn SecretsProvider> = Arc::new(EnvSecretsProvider);

    let api_key = secrets::resolve_api_key(
        secrets.as_ref(),
        config.openai_secret_ref.as_deref(),
        config.openai_api_key.as_deref(),
    )
    .await
    .expect("Failed to resolve OpenAI API key");

    let llm = OpenAiClient::new(
        &config.openai_base_url,
        &api_key,
        &config.summary_model,
        &config.embedding_model,
        Duration::from_secs(config.llm_request_timeout_secs),
    )
    .expect("Failed to initialize LLM client");

    let storage = S3ObjectStore::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");

    let source = config
        .database_source()
        .expect("Failed to resolve database configuration");
    let connector = Arc::new(StoreConnector::new(secrets.clone()));

    if config.run_migrations {
        tracing::info!("Running database migrations");
        let pool = connector
            .pool(&source)
            .await
            .expect("Failed to connect to database");
        db::run_migrations(&pool)
            .await
            .expect("Failed to run database migrations");
    }

    let store = PgResultStore::new(connector, source, config.embedding_dimensions);

    let queue = Arc::new(
        JobQueue::new(
            &config.redis_url,
            DEFAULT_QUEUE_NAME,
            config.visibility_timeout(),
            config.max_receive_count,
        )
        .expect("Failed to initialize job queue"),
    );

    let processor = Arc::new(JobProcessor::new(
        Arc::new(storage),
        Arc::new(llm),
        Arc::new(store),
        config.retry_policy(),
    ));

    let settings = LoopSettings {
        batch_size: config.receive_batch_size.max(1),
        poll_interval: Duration::from_millis(config.poll_interval_ms),
    };

    let dispatcher = Arc::new(BatchDispatcher::new(
        queue.clone(),
        processor,
        config.visibility_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, finishing in-flight jobs");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                // Hold the sender so the loops keep their poll interval.
                let _held = shutdown_tx;
                std::future::pending::<()>().await;
            }
        }
    });
    let shutdown = ShutdownSignal::new(shutdown_rx);

    let mut tasks = JoinSet::new();
    for worker_id in 0..config.worker_concurrency.max(1) {
        tasks.spawn(receive_loop(
            worker_id,
            queue.clone(),
            dispatcher.clone(),
            settings,
            shutdown.clone(),
        ));
    }
    tasks.spawn(reclaim_loop(queue.clone(), shutdown));

    tracing::info!(
        concurrency = config.worker_concurrency,
        batch_size = settings.batch_size,
        "Worker ready, starting job processing loops"
    );

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    tracing::info!("Worker stopped");
}

async fn receive_loop(
    worker_id: usize,
    queue: Arc<JobQueue>,
    dispatcher: Arc<BatchDispatcher>,
    settings: LoopSettings,
    mut shutdown: ShutdownSignal,
) {
    while !shutdown.is_triggered() {
        match queue.receive(settings.batch_size).await {
            Ok(deliveries) if deliveries.is_empty() => {
                tracing::trace!(worker_id, "No jobs available, sleeping");
                shutdown.idle(settings.poll_interval).await;
            }
            Ok(deliveries) => {
                let settlements = dispatcher.dispatch(&deliveries).await;
                tracing::debug!(worker_id, count = settlements.len(), "Batch processed, checking for more");
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Error receiving jobs, will retry");
                shutdown.idle(settings.poll_interval).await;
            }
        }
    }
}

async fn reclaim_loop(queue: Arc<JobQueue>, mut shutdown: ShutdownSignal) {
    while !shutdown.is_triggered() {
        match queue.reclaim_expired().await {
            Ok((0, _)) => {}
            Ok((reclaimed, dead_lettered)) => tracing::warn!(
                reclaimed,
                dead_lettered,
                "Reclaimed messages whose lease expired"
            ),
            Err(e) => tracing::error!(error = %e, "Failed to reclaim expired leases"),
        }

        if let Ok(depth) = queue.depth().await {
            metrics::gauge!("pipeline_queue_depth").set(depth as f64);
        }

        shutdown.idle(RECLAIM_INTERVAL).await;
    }
}
