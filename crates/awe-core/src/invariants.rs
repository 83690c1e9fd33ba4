//! Episode validation and statistical assertions over episode collections.
//!
//! The assertions look at the **latest** execution record of each episode,
//! not the full history. Episodes with no recorded execution are excluded
//! by default ([`UnrecordedPolicy::Exclude`]); an empty or fully excluded
//! collection passes vacuously.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{Episode, ExecutionRecord, MatchOutcome, ValidationError};
use crate::stats;

/// Check that `episode` is structurally well formed.
///
/// # Errors
///
/// - `EmptyEpisodeId`: blank id.
/// - `NotAMapping` or `EmptyMapping`: `inputs` or `expected_outputs` is not
///   a non-empty JSON object.
/// - `BlankField`: `prompt` or `model_name` given but blank.
/// - `NegativeTokenCount`: a declared token count is below zero.
pub fn validate_episode(episode: &Episode) -> Result<(), ValidationError> {
    if episode.episode_id().trim().is_empty() {
        return Err(ValidationError::EmptyEpisodeId);
    }

    validate_mapping("inputs", episode.inputs())?;
    validate_mapping("expected_outputs", episode.expected_outputs())?;

    if episode.prompt().is_some_and(|p| p.trim().is_empty()) {
        return Err(ValidationError::BlankField { field: "prompt" });
    }
    if episode.model_name().is_some_and(|m| m.trim().is_empty()) {
        return Err(ValidationError::BlankField {
            field: "model_name",
        });
    }

    let tokens = episode.token_counts();
    for (key, value) in [
        ("input_tokens", tokens.input_tokens),
        ("output_tokens", tokens.output_tokens),
    ] {
        if value < 0 {
            return Err(ValidationError::NegativeTokenCount {
                key: key.to_string(),
                value,
            });
        }
    }

    Ok(())
}

fn validate_mapping(field: &'static str, value: &Value) -> Result<(), ValidationError> {
    match value.as_object() {
        None => Err(ValidationError::NotAMapping { field }),
        Some(map) if map.is_empty() => Err(ValidationError::EmptyMapping { field }),
        Some(_) => Ok(()),
    }
}

/// How to treat episodes that have never been executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecordedPolicy {
    /// Leave them out of the denominator.
    #[default]
    Exclude,
    /// Idempotency counts them as non-matching; drift and coherence
    /// assertions fail when any is present.
    CountAsFailure,
}

/// What an assertion measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionStats {
    /// The rate or mean compared against the threshold. `None` when no
    /// episode was considered.
    pub observed: Option<f64>,
    pub threshold: f64,
    /// Episodes that contributed to `observed`.
    pub considered: usize,
    /// Episodes without any recorded execution.
    pub unrecorded: usize,
}

/// A statistical threshold was not met. Expected in gating and test
/// contexts; distinct from validation and type errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssertionFailure {
    #[error("idempotency rate {:.2}% below threshold {:.2}% ({} episodes)", .0.observed.unwrap_or(0.0) * 100.0, .0.threshold * 100.0, .0.considered)]
    IdempotencyBelowThreshold(AssertionStats),

    #[error("average drift {:.4} exceeds threshold {:.4} ({} episodes)", .0.observed.unwrap_or(0.0), .0.threshold, .0.considered)]
    DriftAboveMax(AssertionStats),

    #[error("average coherence {:.4} below threshold {:.4} ({} episodes)", .0.observed.unwrap_or(0.0), .0.threshold, .0.considered)]
    CoherenceBelowMin(AssertionStats),

    #[error("{unrecorded} episodes have no recorded execution")]
    UnrecordedEpisodes { unrecorded: usize },
}

impl AssertionFailure {
    pub fn stats(&self) -> Option<&AssertionStats> {
        match self {
            Self::IdempotencyBelowThreshold(s)
            | Self::DriftAboveMax(s)
            | Self::CoherenceBelowMin(s) => Some(s),
            Self::UnrecordedEpisodes { .. } => None,
        }
    }
}

fn latest_records(episodes: &[Episode]) -> (Vec<&ExecutionRecord>, usize) {
    let latest: Vec<&ExecutionRecord> = episodes
        .iter()
        .filter_map(Episode::latest_execution)
        .collect();
    let unrecorded = episodes.len() - latest.len();
    (latest, unrecorded)
}

/// Assert that at least `threshold` of episodes matched on their latest run.
pub fn assert_idempotent(
    episodes: &[Episode],
    threshold: f64,
) -> Result<AssertionStats, AssertionFailure> {
    assert_idempotent_with_policy(episodes, threshold, UnrecordedPolicy::default())
}

pub fn assert_idempotent_with_policy(
    episodes: &[Episode],
    threshold: f64,
    policy: UnrecordedPolicy,
) -> Result<AssertionStats, AssertionFailure> {
    let (latest, unrecorded) = latest_records(episodes);
    let matches = latest
        .iter()
        .filter(|r| r.match_outcome == MatchOutcome::Match)
        .count();

    let considered = match policy {
        UnrecordedPolicy::Exclude => latest.len(),
        UnrecordedPolicy::CountAsFailure => episodes.len(),
    };

    let stats = AssertionStats {
        observed: (considered > 0).then(|| matches as f64 / considered as f64),
        threshold,
        considered,
        unrecorded,
    };

    match stats.observed {
        Some(rate) if rate < threshold => Err(AssertionFailure::IdempotencyBelowThreshold(stats)),
        _ => Ok(stats),
    }
}

fn mean_of_latest<F>(
    episodes: &[Episode],
    threshold: f64,
    policy: UnrecordedPolicy,
    field: F,
) -> Result<AssertionStats, AssertionFailure>
where
    F: Fn(&ExecutionRecord) -> f64,
{
    let (latest, unrecorded) = latest_records(episodes);
    if policy == UnrecordedPolicy::CountAsFailure && unrecorded > 0 {
        return Err(AssertionFailure::UnrecordedEpisodes { unrecorded });
    }
    let values: Vec<f64> = latest.iter().map(|r| field(*r)).collect();
    Ok(AssertionStats {
        observed: stats::mean(&values),
        threshold,
        considered: values.len(),
        unrecorded,
    })
}

/// Assert that the mean latest drift does not exceed `max_drift`.
pub fn assert_low_drift(
    episodes: &[Episode],
    max_drift: f64,
) -> Result<AssertionStats, AssertionFailure> {
    assert_low_drift_with_policy(episodes, max_drift, UnrecordedPolicy::default())
}

pub fn assert_low_drift_with_policy(
    episodes: &[Episode],
    max_drift: f64,
    policy: UnrecordedPolicy,
) -> Result<AssertionStats, AssertionFailure> {
    let stats = mean_of_latest(episodes, max_drift, policy, |r| r.drift)?;
    match stats.observed {
        Some(avg) if avg > max_drift => Err(AssertionFailure::DriftAboveMax(stats)),
        _ => Ok(stats),
    }
}

/// Assert that the mean latest coherence is at least `min_coherence`.
pub fn assert_high_coherence(
    episodes: &[Episode],
    min_coherence: f64,
) -> Result<AssertionStats, AssertionFailure> {
    assert_high_coherence_with_policy(episodes, min_coherence, UnrecordedPolicy::default())
}

pub fn assert_high_coherence_with_policy(
    episodes: &[Episode],
    min_coherence: f64,
    policy: UnrecordedPolicy,
) -> Result<AssertionStats, AssertionFailure> {
    let stats = mean_of_latest(episodes, min_coherence, policy, |r| r.coherence)?;
    match stats.observed {
        Some(avg) if avg < min_coherence => Err(AssertionFailure::CoherenceBelowMin(stats)),
        _ => Ok(stats),
    }
}
