//! Episode evaluation: compares actual against expected outputs, scores
//! drift and coherence, and records the outcome on the episode.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::coherence::{CoherenceScorer, HeuristicCoherence};
use crate::domain::digest::value_digest;
use crate::domain::error::json_type_name;
use crate::domain::{AweError, Episode, MatchOutcome, Result};
use crate::drift::{output_drift, structurally_equal};
use crate::metrics::METRICS;
use crate::obs::{self, EvalSpan};
use crate::stats;
use crate::tracking::{Labels, MetricsTracker};

/// Verdict thresholds and comparison tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Absolute tolerance for numeric equality.
    pub numeric_tolerance: f64,
    /// Drift at or below this counts as a match.
    pub match_drift: f64,
    /// Drift strictly above this counts as a mismatch.
    pub high_drift_threshold: f64,
    /// Settings for the default coherence heuristic.
    pub coherence: HeuristicCoherence,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 1e-6,
            match_drift: 0.0,
            high_drift_threshold: 0.5,
            coherence: HeuristicCoherence::default(),
        }
    }
}

impl EvaluatorConfig {
    /// Map a drift score to a verdict.
    pub fn verdict(&self, drift: f64) -> MatchOutcome {
        if drift <= self.match_drift {
            MatchOutcome::Match
        } else if drift > self.high_drift_threshold {
            MatchOutcome::Mismatch
        } else {
            MatchOutcome::Undetermined
        }
    }
}

/// Metrics returned for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub drift: f64,
    pub coherence: f64,
    /// Equal to the match outcome's score.
    pub idempotency: f64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

/// Per-pair entry in a [`BatchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeResult {
    pub episode_id: String,
    pub match_outcome: MatchOutcome,
    pub metrics: EvaluationMetrics,
}

/// Aggregates over a batch. Every rate and mean is `0.0` for an empty batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Fraction of pairs whose outcome is [`MatchOutcome::Match`].
    pub idempotency_rate: f64,
    pub avg_drift: f64,
    pub avg_coherence: f64,
    pub match_count: usize,
    pub mismatch_count: usize,
    pub undetermined_count: usize,
    pub total_tokens: i64,
    pub drift_stdev: f64,
    pub coherence_stdev: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[EpisodeResult]) -> Self {
        let count = |outcome: MatchOutcome| {
            results
                .iter()
                .filter(|r| r.match_outcome == outcome)
                .count()
        };
        let drifts: Vec<f64> = results.iter().map(|r| r.metrics.drift).collect();
        let coherences: Vec<f64> = results.iter().map(|r| r.metrics.coherence).collect();
        let match_count = count(MatchOutcome::Match);

        Self {
            idempotency_rate: if results.is_empty() {
                0.0
            } else {
                match_count as f64 / results.len() as f64
            },
            avg_drift: stats::mean(&drifts).unwrap_or(0.0),
            avg_coherence: stats::mean(&coherences).unwrap_or(0.0),
            match_count,
            mismatch_count: count(MatchOutcome::Mismatch),
            undetermined_count: count(MatchOutcome::Undetermined),
            total_tokens: results
                .iter()
                .fold(0i64, |acc, r| acc.saturating_add(r.metrics.total_tokens)),
            drift_stdev: stats::sample_stdev(&drifts).unwrap_or(0.0),
            coherence_stdev: stats::sample_stdev(&coherences).unwrap_or(0.0),
        }
    }
}

/// Result of [`EpisodeEvaluator::evaluate_batch`]. `results` mirrors input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub episodes_count: usize,
    pub results: Vec<EpisodeResult>,
    pub summary: BatchSummary,
}

/// Evaluates episodes for idempotency.
///
/// Synchronous and stateless across calls; the only mutation is the
/// execution record appended to the evaluated episode.
#[derive(Clone)]
pub struct EpisodeEvaluator {
    config: EvaluatorConfig,
    coherence: Arc<dyn CoherenceScorer>,
    tracker: Option<MetricsTracker>,
}

impl std::fmt::Debug for EpisodeEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeEvaluator")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl Default for EpisodeEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}

impl EpisodeEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        let coherence: Arc<dyn CoherenceScorer> = Arc::new(config.coherence.clone());
        Self {
            config,
            coherence,
            tracker: None,
        }
    }

    /// Replace the coherence heuristic.
    pub fn with_coherence_scorer(mut self, scorer: Arc<dyn CoherenceScorer>) -> Self {
        self.coherence = scorer;
        self
    }

    /// Export every evaluation and batch to `tracker`.
    pub fn with_tracker(mut self, tracker: MetricsTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Drift and verdict for `actual` against `expected`, without side effects.
    pub fn compare(&self, expected: &Value, actual: &Value) -> Result<(MatchOutcome, f64)> {
        let expected_map = expected.as_object().ok_or(AweError::NotAMapping {
            field: "expected_outputs",
            found: json_type_name(expected),
        })?;
        let actual_map = actual.as_object().ok_or(AweError::NotAMapping {
            field: "actual_outputs",
            found: json_type_name(actual),
        })?;

        if structurally_equal(expected, actual, self.config.numeric_tolerance) {
            return Ok((MatchOutcome::Match, 0.0));
        }
        let drift = output_drift(expected_map, actual_map, self.config.numeric_tolerance);
        Ok((self.config.verdict(drift), drift))
    }

    /// Coherence of `actual`, clamped to `[0, 1]`. Non-objects score 0.
    pub fn coherence(&self, actual: &Value) -> f64 {
        let score = actual
            .as_object()
            .map(|outputs| self.coherence.score(outputs))
            .unwrap_or(0.0);
        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }

    /// Evaluate one execution of `episode` and append the outcome to it.
    ///
    /// # Errors
    ///
    /// [`AweError::NotAMapping`] if `actual_outputs` or the episode's
    /// expected outputs is not a JSON object. Nothing is recorded then.
    /// Missing or extra keys are drift, never an error.
    pub fn evaluate_episode(
        &self,
        episode: &mut Episode,
        actual_outputs: &Value,
    ) -> Result<(MatchOutcome, EvaluationMetrics)> {
        let _span = EvalSpan::episode(episode.episode_id());

        let (outcome, drift) = self.compare(episode.expected_outputs(), actual_outputs)?;
        let coherence = self.coherence(actual_outputs);

        episode.record_execution(actual_outputs.clone(), outcome, drift, coherence);

        let tokens = episode.token_counts();
        let metrics = EvaluationMetrics {
            drift,
            coherence,
            idempotency: outcome.score(),
            input_tokens: tokens.input_tokens,
            output_tokens: tokens.output_tokens,
            total_tokens: tokens.total(),
        };

        METRICS.inc_episodes_evaluated();
        obs::emit_episode_evaluated(episode.episode_id(), outcome, drift, coherence);

        if let Some(tracker) = &self.tracker {
            let metadata = json!({
                "inputs_digest": value_digest(episode.inputs()),
                "expected_outputs_digest": value_digest(episode.expected_outputs()),
                "actual_outputs_digest": value_digest(actual_outputs),
            });
            tracker.log_evaluation(
                episode.episode_id(),
                &metrics,
                episode.model_name(),
                &Labels::new(),
                Some(&metadata),
            );
        }

        Ok((outcome, metrics))
    }

    /// Evaluate `(episode, actual_outputs)` pairs in order.
    ///
    /// An empty batch yields a zeroed summary. A pair whose outputs are not
    /// a mapping aborts the batch with [`AweError::BatchItem`]; pairs
    /// before it keep their recorded executions.
    pub fn evaluate_batch(
        &self,
        batch_id: &str,
        pairs: &mut [(Episode, Value)],
    ) -> Result<BatchResult> {
        let _span = EvalSpan::batch(batch_id);
        let mut results = Vec::with_capacity(pairs.len());

        for (index, (episode, actual)) in pairs.iter_mut().enumerate() {
            let episode_id = episode.episode_id().to_string();
            let (match_outcome, metrics) =
                self.evaluate_episode(episode, actual)
                    .map_err(|source| AweError::BatchItem {
                        index,
                        episode_id: episode_id.clone(),
                        source: Box::new(source),
                    })?;
            results.push(EpisodeResult {
                episode_id,
                match_outcome,
                metrics,
            });
        }

        let summary = BatchSummary::from_results(&results);
        let batch = BatchResult {
            batch_id: batch_id.to_string(),
            episodes_count: results.len(),
            results,
            summary,
        };

        METRICS.inc_batches_evaluated();
        obs::emit_batch_evaluated(batch_id, batch.episodes_count, batch.summary.idempotency_rate);

        if let Some(tracker) = &self.tracker {
            tracker.log_batch(batch_id, &batch);
        }

        Ok(batch)
    }
}
