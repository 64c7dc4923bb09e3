use anyhow::Error;
use chrono::Duration;
use health::{HealthHandle, HealthRegistry};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

pub struct AppContext {
    pub config: Config,
    pub pool: sqlx::PgPool,
    pub health_registry: HealthRegistry,
    pub worker_liveness: HealthHandle,
}

impl AppContext {
    pub async fn new(config: &Config) -> Result<Self, Error> {
        let health_registry = HealthRegistry::new("liveness");
        let worker_liveness = health_registry
            .register("transform_worker".to_string(), Duration::seconds(60))
            .await;

        let options = PgPoolOptions::new().max_connections(config.max_pg_connections);
        let pool = options.connect(&config.database_url).await?;

        Ok(Self {
            config: config.clone(),
            pool,
            health_registry,
            worker_liveness,
        })
    }
}
