use std::future::Future;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::config::EngineSettings;
use crate::core::shutdown;
use crate::services::engine::ExamEngine;
use crate::tasks::jobs;

/// Runs the sweep and settle loops until a shutdown signal arrives.
pub(crate) async fn run(engine: ExamEngine, settings: EngineSettings) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = spawn_loops(engine, &settings, shutdown_rx);

    tracing::info!(
        sweep_interval_seconds = settings.sweep_interval_seconds,
        settle_interval_seconds = settings.settle_interval_seconds,
        batch_size = settings.sweep_batch_size,
        "Background loops started"
    );

    shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

fn spawn_loops(
    engine: ExamEngine,
    settings: &EngineSettings,
    shutdown_rx: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let batch_size = settings.sweep_batch_size;

    let sweep_engine = engine.clone();
    let sweep = tokio::spawn(every(
        "sweep_expired",
        Duration::from_secs(settings.sweep_interval_seconds),
        shutdown_rx.clone(),
        move || {
            let engine = sweep_engine.clone();
            async move { jobs::sweep_expired_attempts(&engine, batch_size).await.map(|_| ()) }
        },
    ));

    let settle = tokio::spawn(every(
        "settle_closed",
        Duration::from_secs(settings.settle_interval_seconds),
        shutdown_rx,
        move || {
            let engine = engine.clone();
            async move { jobs::settle_closed_attempts(&engine, batch_size).await.map(|_| ()) }
        },
    ));

    vec![sweep, settle]
}

async fn every<F, Fut, E>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown::wait_for(&mut shutdown) => break,
            _ = tick.tick() => {
                if let Err(err) = job().await {
                    tracing::error!(job = name, error = %err, "Background job failed");
                }
            }
        }
    }

    tracing::info!(job = name, "Background loop stopped");
}
