use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::services::submission::{self, SubmitOutcome};

const SWEEP_BATCH_SIZE: i64 = 100;

pub(crate) async fn sweep_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(state.settings().exam().sweep_interval_seconds));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = sweep_overdue_attempts(&state).await {
                    tracing::error!(error = %err, "sweep_overdue_attempts failed");
                }
            }
        }
    }
}

/// Force-submits every in-progress attempt whose deadline lapsed more than
/// the grace window ago. The attempt closes with no answers on record; a
/// client submit racing the sweep loses the claim and no-ops.
pub(crate) async fn sweep_overdue_attempts(state: &AppState) -> Result<()> {
    let now = primitive_now_utc();
    let grace =
        time::Duration::seconds(state.settings().exam().submit_grace_seconds as i64);
    let cutoff = now - grace;

    let overdue = repositories::attempts::list_overdue(state.db(), cutoff, SWEEP_BATCH_SIZE)
        .await
        .context("Failed to list overdue attempts")?;

    if overdue.is_empty() {
        return Ok(());
    }

    let mut swept = 0;
    for attempt_id in &overdue {
        match submission::submit(state.db(), attempt_id, &[], now).await {
            Ok(SubmitOutcome::Submitted(_)) => swept += 1,
            Ok(SubmitOutcome::AlreadySubmitted(_)) => {}
            Err(err) => {
                tracing::error!(attempt_id, error = %err, "Failed to force-submit overdue attempt");
            }
        }
    }

    tracing::info!(overdue = overdue.len(), swept, "Swept overdue attempts");
    metrics::counter!("attempts_force_submitted_total").increment(swept as u64);

    Ok(())
}
