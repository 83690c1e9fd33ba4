//! Structured observability hooks for evaluation lifecycle events.
//!
//! Events are emitted at `info!` level, except sink failures and failed
//! gates which go out at `warn!`. Filtering follows `RUST_LOG`; see
//! [`init_tracing`](crate::telemetry::init_tracing).

use tracing::{info, warn};

use crate::domain::MatchOutcome;

/// RAII guard that enters an evaluation-scoped tracing span.
///
/// ```ignore
/// let _span = EvalSpan::batch("batch-7");
/// // every event below carries batch_id = "batch-7"
/// ```
pub struct EvalSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvalSpan {
    pub fn episode(episode_id: &str) -> Self {
        let span = tracing::info_span!("awe.episode", episode_id = %episode_id);
        Self {
            _span: span.entered(),
        }
    }

    pub fn batch(batch_id: &str) -> Self {
        let span = tracing::info_span!("awe.batch", batch_id = %batch_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: one episode evaluated.
pub fn emit_episode_evaluated(episode_id: &str, outcome: MatchOutcome, drift: f64, coherence: f64) {
    info!(
        event = "episode.evaluated",
        episode_id = %episode_id,
        outcome = outcome.label(),
        drift = drift,
        coherence = coherence,
    );
}

/// Emit event: batch evaluated with its idempotency rate.
pub fn emit_batch_evaluated(batch_id: &str, episodes: usize, idempotency_rate: f64) {
    info!(
        event = "batch.evaluated",
        batch_id = %batch_id,
        episodes = episodes,
        idempotency_rate = idempotency_rate,
    );
}

/// Emit event: gate evaluated over a set of episodes.
pub fn emit_gate_evaluated(episodes: usize, violations: usize) {
    if violations == 0 {
        info!(event = "gate.evaluated", episodes = episodes, passed = true);
    } else {
        warn!(
            event = "gate.evaluated",
            episodes = episodes,
            passed = false,
            violations = violations,
        );
    }
}

/// Emit event: a tracking sink call failed and was swallowed.
pub fn emit_tracking_sink_error(
    operation: &str,
    run_id: Option<&str>,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "tracking.sink_error",
        operation = %operation,
        run_id = run_id.unwrap_or("-"),
        error = %error,
    );
}
