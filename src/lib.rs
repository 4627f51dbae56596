pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::repositories::attempts::PgAttemptRepository;
use crate::repositories::{
    directory::PgMembershipDirectory, questions::PgQuestionBank, tests::PgTestDefinitionStore,
};
use crate::services::engine::{EnginePorts, ExamEngine};
use crate::services::notifications::RedisNotifier;
use crate::services::ports::SystemClock;
use crate::services::results::GradingConfig;

/// Shared startup for both binaries: settings, tracing, metrics, database
/// with migrations applied, and a Redis handle that may stay disconnected.
async fn bootstrap(component: &'static str) -> anyhow::Result<(Settings, PgPool, RedisHandle)> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings, component)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await.context("Failed to connect to PostgreSQL")?;
    db::run_migrations(&db_pool).await.context("Failed to apply migrations")?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; notifications will be dropped");
    } else {
        tracing::info!("Redis connected successfully");
    }

    Ok((settings, db_pool, redis))
}

fn build_engine(settings: &Settings, db_pool: &PgPool, redis: &RedisHandle) -> ExamEngine {
    ExamEngine::new(
        EnginePorts {
            attempts: Arc::new(PgAttemptRepository::new(db_pool.clone())),
            tests: Arc::new(PgTestDefinitionStore::new(db_pool.clone())),
            questions: Arc::new(PgQuestionBank::new(db_pool.clone())),
            directory: Arc::new(PgMembershipDirectory::new(db_pool.clone())),
            notifier: Arc::new(RedisNotifier::new(redis.clone())),
            clock: Arc::new(SystemClock),
        },
        GradingConfig::from_settings(settings.engine()),
    )
}

pub async fn run() -> anyhow::Result<()> {
    let (settings, db_pool, redis) = bootstrap("api").await?;
    let engine = build_engine(&settings, &db_pool, &redis);
    let state = AppState::new(settings, db_pool, redis.clone(), engine);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Examcore API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    let (settings, db_pool, redis) = bootstrap("worker").await?;
    let engine = build_engine(&settings, &db_pool, &redis);

    let result = tasks::scheduler::run(engine, settings.engine().clone()).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
