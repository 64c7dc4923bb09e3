use std::{future::ready, sync::Arc, time::Duration};

use anyhow::Error;
use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use smelter_core::health::ingestion_health;
use smelter_core::PgSettingsSource;
use smelter_poller::{
    config::Config,
    context::AppContext,
    metrics_consts::MAIN_LOOP_TIME,
    poller::{Poller, PollerOptions},
    source::RestSourceClient,
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
    "smelter poller"
}

fn start_health_liveness_server(config: &Config, context: Arc<AppContext>) -> JoinHandle<()> {
    let config = config.clone();
    let liveness_context = context.clone();
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || ready(liveness_context.health_registry.get_status())),
        )
        .route(
            "/api/ingestion/health/:estate_id",
            get(move |Path(estate_id): Path<i32>| async move {
                let stalled_after =
                    chrono::Duration::seconds(context.config.stalled_after_seconds as i64);
                match ingestion_health(&context.pool, estate_id, stalled_after).await {
                    Ok(report) => (StatusCode::OK, Json(report)).into_response(),
                    Err(err) => {
                        error!(estate_id, error = %err, "health derivation failed");
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }),
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

    let source = Arc::new(
        RestSourceClient::new(
            &config.source_base_url,
            &config.source_api_token,
            &config.source_system,
            config.source_page_size,
            Duration::from_secs(config.source_timeout_seconds),
        )
        .unwrap(),
    );
    let settings = Arc::new(PgSettingsSource::from_pool(context.pool.clone()));
    let poller = Poller::new(
        context.pool.clone(),
        settings,
        source,
        PollerOptions::from_config(&config),
    );

    let interval = Duration::from_secs(config.poll_interval_seconds);

    loop {
        let loop_time = common_metrics::timing_guard(MAIN_LOOP_TIME, &[]);
        context.poller_liveness.report_healthy().await;

        let estates = poller.list_estates().await?;
        if estates.is_empty() {
            info!("No estates configured, sleeping");
        }
        for estate in estates {
            // Estate runs are isolated: a failed run is recorded in the
            // ledger and the loop moves on to the next estate
            if let Err(err) = poller.run_estate(&estate).await {
                error!(estate_id = estate.id, error = %err, "estate run failed");
            }
            context.poller_liveness.report_healthy().await;
        }

        loop_time.fin();
        tokio::time::sleep(interval).await;
    }
}
