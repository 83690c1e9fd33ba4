//! Flat row shape for the external structured store.
//!
//! The store keeps JSON payloads as text columns and one step evaluation per
//! episode row. `status` and `cost_usd` are owned by the writer and are
//! left unset here.

use serde::{Deserialize, Serialize};

use super::episode::{Episode, MatchOutcome};
use super::error::Result;

/// Store-side label for a match outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMatchOutcome {
    Match,
    Mismatch,
    Undetermined,
}

impl From<MatchOutcome> for StepMatchOutcome {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Match => Self::Match,
            MatchOutcome::Mismatch => Self::Mismatch,
            MatchOutcome::Undetermined => Self::Undetermined,
        }
    }
}

/// Episode status as stored. Derived by the writer from match outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Successful,
    Degraded,
    Failed,
}

/// Evaluation of the latest execution step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEvaluation {
    pub match_outcome: StepMatchOutcome,
    pub drift_score: f64,
    pub coherence_score: f64,
    pub idempotency_score: f64,
}

/// One row of the episode table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode_id: String,
    pub episode_version: String,
    pub status: Option<EpisodeStatus>,
    pub model_name: Option<String>,
    pub prompt: Option<String>,
    pub inputs_json: String,
    pub expected_outputs_json: String,
    /// Latest execution's actual outputs, if any execution was recorded.
    pub actual_outputs_json: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: Option<f64>,
    pub execution_count: usize,
    pub step_evaluation: Option<StepEvaluation>,
}

impl EpisodeRecord {
    pub fn from_episode(episode: &Episode, episode_version: impl Into<String>) -> Result<Self> {
        let tokens = episode.token_counts();
        let latest = episode.latest_execution();

        let actual_outputs_json = latest
            .map(|r| serde_json::to_string(&r.actual_outputs))
            .transpose()?;

        Ok(Self {
            episode_id: episode.episode_id().to_string(),
            episode_version: episode_version.into(),
            status: None,
            model_name: episode.model_name().map(str::to_string),
            prompt: episode.prompt().map(str::to_string),
            inputs_json: serde_json::to_string(episode.inputs())?,
            expected_outputs_json: serde_json::to_string(episode.expected_outputs())?,
            actual_outputs_json,
            input_tokens: tokens.input_tokens,
            output_tokens: tokens.output_tokens,
            total_tokens: tokens.total(),
            cost_usd: None,
            execution_count: episode.execution_count(),
            step_evaluation: latest.map(|r| StepEvaluation {
                match_outcome: r.match_outcome.into(),
                drift_score: r.drift,
                coherence_score: r.coherence,
                idempotency_score: r.match_outcome.score(),
            }),
        })
    }

    /// Attach the writer-derived status.
    pub fn with_status(mut self, status: EpisodeStatus) -> Self {
        self.status = Some(status);
        self
    }
}
