use std::{future::ready, sync::Arc, time::Duration};

use anyhow::Error;
use axum::{routing::get, Router};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use smelter_core::RetryPolicy;
use smelter_transform::{
    config::Config, context::AppContext, metrics_consts::BATCH_TIME, scheduler::Scheduler,
};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer: tracing_subscriber::filter::Filtered<
        tracing_subscriber::fmt::Layer<tracing_subscriber::Registry>,
        EnvFilter,
        tracing_subscriber::Registry,
    > = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "smelter transform worker"
}

fn start_health_liveness_server(config: &Config, context: Arc<AppContext>) -> JoinHandle<()> {
    let config = config.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(context.health_registry.get_status())),
        );
    let router = setup_metrics_routes(router);
    let bind = format!("{}:{}", config.host, config.port);
    tokio::task::spawn(async move {
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().unwrap();
    let context = Arc::new(AppContext::new(&config).await.unwrap());

    start_health_liveness_server(&config, context.clone());

    let scheduler = Scheduler::new(
        context.pool.clone(),
        config.batch_size,
        config.max_concurrent_transactions,
    );

    let empty_wait = Duration::from_millis(config.empty_batch_wait_ms);
    let backoff = RetryPolicy::build(2, Duration::from_secs(1))
        .maximum_interval(Duration::from_secs(30))
        .provide();
    let mut consecutive_failures: u32 = 0;

    loop {
        context.worker_liveness.report_healthy().await;

        let batch_time = common_metrics::timing_guard(BATCH_TIME, &[]);
        match scheduler.drain_batch().await {
            Ok(stats) if stats.claimed == 0 => {
                batch_time.label("outcome", "empty").fin();
                consecutive_failures = 0;
                tokio::time::sleep(empty_wait).await;
            }
            Ok(stats) => {
                batch_time.label("outcome", "drained").fin();
                consecutive_failures = 0;
                info!(
                    claimed = stats.claimed,
                    processed = stats.processed,
                    failed = stats.failed,
                    skipped = stats.skipped,
                    races_recovered = stats.races_recovered,
                    "batch drained"
                );
            }
            Err(err) => {
                batch_time.label("outcome", "error").fin();
                consecutive_failures += 1;
                let wait = backoff.retry_interval(consecutive_failures);
                error!(error = %err, "batch drain failed, backing off");
                tokio::time::sleep(wait).await;
            }
        }
    }
}
