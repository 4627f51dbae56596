use crate::services::engine::{EngineError, ExamEngine, SweepReport};

/// Upper bound on consecutive full batches drained in one tick.
const MAX_BATCHES_PER_TICK: usize = 20;

/// Closes or advances every attempt whose deadline has passed, batch by
/// batch, while batches come back full and keep making progress.
pub(crate) async fn sweep_expired_attempts(
    engine: &ExamEngine,
    batch_size: i64,
) -> Result<SweepReport, EngineError> {
    let mut total = SweepReport::default();

    for _ in 0..MAX_BATCHES_PER_TICK {
        let report = engine.sweep_expired(batch_size).await?;
        total.closed += report.closed;
        total.advanced += report.advanced;
        total.failed += report.failed;

        let touched = report.closed + report.advanced + report.failed;
        let progressed = report.closed + report.advanced > 0;
        if (touched as i64) < batch_size || !progressed {
            break;
        }
    }

    if total != SweepReport::default() {
        tracing::info!(
            closed = total.closed,
            advanced = total.advanced,
            failed = total.failed,
            "Expired attempt sweep finished"
        );
    }
    Ok(total)
}

/// Auto-grades and promotes closed attempts left unsettled by a crash or
/// a failed close path.
pub(crate) async fn settle_closed_attempts(
    engine: &ExamEngine,
    batch_size: i64,
) -> Result<usize, EngineError> {
    let settled = engine.settle_unsettled(batch_size).await?;
    if settled > 0 {
        tracing::info!(settled, "Settled closed attempts");
    }
    Ok(settled)
}
