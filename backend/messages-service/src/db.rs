use crate::config::DatabaseConfig;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn init_pool(cfg: &DatabaseConfig) -> Result<Pool<Postgres>, sqlx::Error> {
    info!(
        max_connections = cfg.max_connections,
        min_connections = cfg.min_connections,
        acquire_timeout_secs = cfg.acquire_timeout.as_secs(),
        "Creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .min_connections(cfg.min_connections)
        .acquire_timeout(cfg.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&cfg.url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}
