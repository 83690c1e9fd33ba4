//! Episode entity: one logical unit of AI workflow work and its
//! accumulated execution history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::Result;
use crate::stats;

/// Verdict for one comparison of actual vs. expected outputs.
///
/// Serialized as its score (`1.0`, `0.0`, `0.5`) so histories stay
/// compatible with numeric metric pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOutcome {
    Match,
    Mismatch,
    Undetermined,
}

impl MatchOutcome {
    pub fn score(self) -> f64 {
        match self {
            Self::Match => 1.0,
            Self::Mismatch => 0.0,
            Self::Undetermined => 0.5,
        }
    }

    /// Inverse of [`score`](Self::score). Any other value is rejected.
    pub fn from_score(score: f64) -> Option<Self> {
        if score == 1.0 {
            Some(Self::Match)
        } else if score == 0.0 {
            Some(Self::Mismatch)
        } else if score == 0.5 {
            Some(Self::Undetermined)
        } else {
            None
        }
    }

    /// Label used by the structured store (`match`, `mismatch`, `undetermined`).
    pub fn label(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Mismatch => "mismatch",
            Self::Undetermined => "undetermined",
        }
    }
}

impl Serialize for MatchOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.score())
    }
}

impl<'de> Deserialize<'de> for MatchOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let score = f64::deserialize(deserializer)?;
        MatchOutcome::from_score(score).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "match outcome must be 1.0, 0.0 or 0.5, got {score}"
            ))
        })
    }
}

/// Declared token usage for an episode.
///
/// Signed so that malformed submissions survive deserialization and are
/// rejected by validation instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
}

impl TokenCounts {
    pub fn new(input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Outcome of one execution, appended by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub actual_outputs: Value,
    pub match_outcome: MatchOutcome,
    /// 0.0 (no drift) to 1.0, lower is better.
    pub drift: f64,
    /// 0.0 (incoherent) to 1.0, higher is better.
    pub coherence: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Snapshot of an episode's accumulated metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub episode_id: String,
    pub execution_count: usize,
    /// Mean match score, `0.0` when nothing has been recorded.
    pub match_rate: f64,
    /// `None` when nothing has been recorded.
    pub avg_drift: Option<f64>,
    /// `None` when nothing has been recorded.
    pub avg_coherence: Option<f64>,
    pub drift_stdev: Option<f64>,
    pub coherence_stdev: Option<f64>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub token_counts: TokenCounts,
}

fn new_episode_id() -> String {
    Uuid::new_v4().to_string()
}

/// An AI workflow episode.
///
/// The definition (`inputs`, `expected_outputs`, prompt, model, token counts)
/// is fixed at construction. Construction does not validate; run
/// [`validate_episode`](crate::invariants::validate_episode) before trusting
/// the shape.
///
/// Appending requires `&mut self`. Evaluators sharing one episode across
/// threads wrap it in `Arc<Mutex<Episode>>`, which serializes appends and
/// keeps history in call order.
///
/// Deserialization also reads the flat export shape, where history is kept
/// as parallel `metrics.{match,drift,coherence}` lists and timestamps carry
/// no offset (read as UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EpisodeRepr")]
pub struct Episode {
    episode_id: String,
    inputs: Value,
    expected_outputs: Value,
    prompt: Option<String>,
    model_name: Option<String>,
    token_counts: TokenCounts,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
    executions: Vec<ExecutionRecord>,
}

#[derive(Deserialize)]
struct EpisodeRepr {
    #[serde(default = "new_episode_id")]
    episode_id: String,
    inputs: Value,
    expected_outputs: Value,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    model_name: Option<String>,
    #[serde(default)]
    token_counts: TokenCounts,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default = "Utc::now", deserialize_with = "timestamp::deserialize")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    executions: Option<Vec<ExecutionRecord>>,
    #[serde(default)]
    metrics: Option<MetricLists>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    last_execution_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct MetricLists {
    #[serde(default, rename = "match")]
    matches: Vec<f64>,
    #[serde(default)]
    drift: Vec<f64>,
    #[serde(default)]
    coherence: Vec<f64>,
}

impl MetricLists {
    /// Per-run timestamps and outputs are not part of this shape, so every
    /// record gets `recorded_at` and null `actual_outputs`.
    fn into_records(
        self,
        recorded_at: DateTime<Utc>,
    ) -> std::result::Result<Vec<ExecutionRecord>, String> {
        if self.drift.len() != self.matches.len() || self.coherence.len() != self.matches.len() {
            return Err(format!(
                "metrics lists differ in length: match {}, drift {}, coherence {}",
                self.matches.len(),
                self.drift.len(),
                self.coherence.len()
            ));
        }
        self.matches
            .into_iter()
            .zip(self.drift)
            .zip(self.coherence)
            .map(|((score, drift), coherence)| {
                let match_outcome = MatchOutcome::from_score(score).ok_or_else(|| {
                    format!("metrics.match value {score} is not 1.0, 0.0 or 0.5")
                })?;
                Ok(ExecutionRecord {
                    actual_outputs: Value::Null,
                    match_outcome,
                    drift,
                    coherence,
                    recorded_at,
                })
            })
            .collect()
    }
}

impl TryFrom<EpisodeRepr> for Episode {
    type Error = String;

    fn try_from(repr: EpisodeRepr) -> std::result::Result<Self, Self::Error> {
        let executions = match (repr.executions, repr.metrics) {
            (Some(executions), _) => executions,
            (None, Some(lists)) => {
                lists.into_records(repr.last_execution_at.unwrap_or(repr.created_at))?
            }
            (None, None) => Vec::new(),
        };
        Ok(Self {
            episode_id: repr.episode_id,
            inputs: repr.inputs,
            expected_outputs: repr.expected_outputs,
            prompt: repr.prompt,
            model_name: repr.model_name,
            token_counts: repr.token_counts,
            metadata: repr.metadata,
            created_at: repr.created_at,
            executions,
        })
    }
}

/// RFC 3339 timestamps, or naive ISO 8601 ones taken as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Ok(dt.with_timezone(&Utc)),
            Err(_) => {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
            }
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

impl Episode {
    /// Create an episode with a generated id and default optional fields.
    pub fn new(inputs: Value, expected_outputs: Value) -> Self {
        Self {
            episode_id: new_episode_id(),
            inputs,
            expected_outputs,
            prompt: None,
            model_name: None,
            token_counts: TokenCounts::default(),
            metadata: Map::new(),
            created_at: Utc::now(),
            executions: Vec::new(),
        }
    }

    pub fn with_id(mut self, episode_id: impl Into<String>) -> Self {
        self.episode_id = episode_id.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    pub fn with_token_counts(mut self, token_counts: TokenCounts) -> Self {
        self.token_counts = token_counts;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    pub fn inputs(&self) -> &Value {
        &self.inputs
    }

    pub fn expected_outputs(&self) -> &Value {
        &self.expected_outputs
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model_name.as_deref()
    }

    pub fn token_counts(&self) -> TokenCounts {
        self.token_counts
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Execution history in call order.
    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.executions
    }

    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    pub fn latest_execution(&self) -> Option<&ExecutionRecord> {
        self.executions.last()
    }

    pub fn last_execution_at(&self) -> Option<DateTime<Utc>> {
        self.latest_execution().map(|r| r.recorded_at)
    }

    /// Append the outcome of one execution. Prior records are never touched.
    pub fn record_execution(
        &mut self,
        actual_outputs: Value,
        match_outcome: MatchOutcome,
        drift: f64,
        coherence: f64,
    ) {
        self.executions.push(ExecutionRecord {
            actual_outputs,
            match_outcome,
            drift,
            coherence,
            recorded_at: Utc::now(),
        });
    }

    /// Clear the execution history. Identity and definition are untouched.
    pub fn reset_metrics(&mut self) {
        self.executions.clear();
    }

    pub fn get_metrics_summary(&self) -> MetricsSummary {
        let matches: Vec<f64> = self
            .executions
            .iter()
            .map(|r| r.match_outcome.score())
            .collect();
        let drifts: Vec<f64> = self.executions.iter().map(|r| r.drift).collect();
        let coherences: Vec<f64> = self.executions.iter().map(|r| r.coherence).collect();

        MetricsSummary {
            episode_id: self.episode_id.clone(),
            execution_count: self.executions.len(),
            match_rate: stats::mean(&matches).unwrap_or(0.0),
            avg_drift: stats::mean(&drifts),
            avg_coherence: stats::mean(&coherences),
            drift_stdev: stats::sample_stdev(&drifts),
            coherence_stdev: stats::sample_stdev(&coherences),
            last_execution_at: self.last_execution_at(),
            token_counts: self.token_counts,
        }
    }

    /// Structural serialization including the full execution history.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_episode() -> Episode {
        Episode::new(
            json!({"question": "capital of France?"}),
            json!({"answer": "Paris", "confidence": 0.95}),
        )
        .with_id("ep-1")
        .with_prompt("Answer the question")
        .with_model_name("gpt-test")
        .with_token_counts(TokenCounts::new(12, 3))
    }

    #[test]
    fn test_new_generates_id_and_defaults() {
        let ep = Episode::new(json!({"a": 1}), json!({"b": 2}));
        assert!(Uuid::parse_str(ep.episode_id()).is_ok());
        assert_eq!(ep.token_counts(), TokenCounts::new(0, 0));
        assert!(ep.prompt().is_none());
        assert!(ep.model_name().is_none());
        assert!(ep.metadata().is_empty());
        assert_eq!(ep.execution_count(), 0);
        assert!(ep.last_execution_at().is_none());
    }

    #[test]
    fn test_record_execution_appends_in_order() {
        let mut ep = sample_episode();
        ep.record_execution(json!({"answer": "Paris"}), MatchOutcome::Match, 0.0, 0.9);
        ep.record_execution(json!({"answer": "Rome"}), MatchOutcome::Mismatch, 0.8, 0.7);

        assert_eq!(ep.execution_count(), 2);
        assert_eq!(ep.executions()[0].match_outcome, MatchOutcome::Match);
        assert_eq!(ep.executions()[1].actual_outputs, json!({"answer": "Rome"}));
        assert_eq!(
            ep.latest_execution().map(|r| r.match_outcome),
            Some(MatchOutcome::Mismatch)
        );
        assert!(ep.executions()[0].recorded_at <= ep.executions()[1].recorded_at);
    }

    #[test]
    fn test_metrics_summary_means() {
        let mut ep = sample_episode();
        ep.record_execution(json!({}), MatchOutcome::Match, 0.0, 1.0);
        ep.record_execution(json!({}), MatchOutcome::Undetermined, 0.4, 0.6);

        let summary = ep.get_metrics_summary();
        assert_eq!(summary.episode_id, "ep-1");
        assert_eq!(summary.execution_count, 2);
        assert!((summary.match_rate - 0.75).abs() < 1e-12);
        assert!((summary.avg_drift.unwrap() - 0.2).abs() < 1e-12);
        assert!((summary.avg_coherence.unwrap() - 0.8).abs() < 1e-12);
        assert!(summary.drift_stdev.unwrap() > 0.0);
        assert_eq!(summary.token_counts.total(), 15);
    }

    #[test]
    fn test_metrics_summary_empty_has_no_averages() {
        let summary = sample_episode().get_metrics_summary();
        assert_eq!(summary.execution_count, 0);
        assert_eq!(summary.match_rate, 0.0);
        assert!(summary.avg_drift.is_none());
        assert!(summary.avg_coherence.is_none());
        assert!(summary.last_execution_at.is_none());
    }

    #[test]
    fn test_reset_metrics_clears_history_only() {
        let mut ep = sample_episode();
        ep.record_execution(json!({"answer": "Paris"}), MatchOutcome::Match, 0.0, 1.0);
        ep.reset_metrics();
        ep.reset_metrics();

        let summary = ep.get_metrics_summary();
        assert_eq!(summary.execution_count, 0);
        assert!(summary.avg_drift.is_none());
        assert_eq!(ep.episode_id(), "ep-1");
        assert_eq!(ep.model_name(), Some("gpt-test"));
        assert_eq!(ep.expected_outputs()["answer"], "Paris");
    }

    #[test]
    fn test_json_roundtrip_preserves_history() {
        let mut ep = sample_episode();
        ep.record_execution(
            json!({"answer": "Paris", "confidence": 0.95}),
            MatchOutcome::Match,
            0.0,
            0.92,
        );
        ep.record_execution(
            json!({"answer": "Lyon", "confidence": 0.5}),
            MatchOutcome::Undetermined,
            0.41,
            0.8,
        );

        let restored = Episode::from_json(&ep.to_json().unwrap()).unwrap();
        assert_eq!(restored, ep);
        assert_eq!(restored.inputs(), ep.inputs());
        assert_eq!(restored.expected_outputs(), ep.expected_outputs());
        assert_eq!(restored.executions(), ep.executions());
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let ep = sample_episode();
        assert_eq!(ep.to_json().unwrap(), ep.to_json().unwrap());

        let value = ep.to_value().unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert!(keys.contains(&"episode_id"));
        assert!(keys.contains(&"executions"));
    }

    #[test]
    fn test_from_value_generates_missing_id() {
        let ep = Episode::from_value(json!({
            "inputs": {"q": "a"},
            "expected_outputs": {"x": 1},
        }))
        .unwrap();
        assert!(!ep.episode_id().is_empty());
        assert_eq!(ep.execution_count(), 0);
    }

    #[test]
    fn test_from_value_requires_definition() {
        let err = Episode::from_value(json!({"inputs": {"q": "a"}})).unwrap_err();
        assert!(err.to_string().contains("expected_outputs"));
    }

    #[test]
    fn test_match_outcome_serializes_as_score() {
        assert_eq!(
            serde_json::to_value(MatchOutcome::Undetermined).unwrap(),
            json!(0.5)
        );
        let parsed: MatchOutcome = serde_json::from_value(json!(1.0)).unwrap();
        assert_eq!(parsed, MatchOutcome::Match);
        assert!(serde_json::from_value::<MatchOutcome>(json!(0.7)).is_err());
    }

    #[test]
    fn test_match_outcome_labels() {
        assert_eq!(MatchOutcome::Match.label(), "match");
        assert_eq!(MatchOutcome::Mismatch.label(), "mismatch");
        assert_eq!(MatchOutcome::Undetermined.label(), "undetermined");
    }

    #[test]
    fn test_naive_timestamps_are_read_as_utc() {
        let ep = Episode::from_value(json!({
            "inputs": {"q": "a"},
            "expected_outputs": {"x": 1},
            "created_at": "2024-05-01T12:00:00.123456",
        }))
        .unwrap();
        assert_eq!(
            ep.created_at().to_rfc3339(),
            "2024-05-01T12:00:00.123456+00:00"
        );

        let whole = timestamp::parse("2024-05-01T12:00:00").unwrap();
        let offset = timestamp::parse("2024-05-01T14:00:00+02:00").unwrap();
        assert_eq!(whole, offset);
        assert!(timestamp::parse("yesterday").is_err());
    }

    #[test]
    fn test_metric_lists_become_execution_records() {
        let ep = Episode::from_value(json!({
            "inputs": {"q": "a"},
            "expected_outputs": {"x": 1},
            "metrics": {"match": [1.0, 0.5], "drift": [0.0, 0.3], "coherence": [0.9, 0.7]},
            "execution_count": 2,
            "last_execution_at": "2024-05-02T08:30:00",
        }))
        .unwrap();

        assert_eq!(ep.execution_count(), 2);
        assert_eq!(ep.executions()[1].match_outcome, MatchOutcome::Undetermined);
        assert_eq!(ep.executions()[1].drift, 0.3);
        assert_eq!(ep.executions()[0].actual_outputs, Value::Null);
        assert_eq!(
            ep.last_execution_at(),
            Some(timestamp::parse("2024-05-02T08:30:00").unwrap())
        );
    }

    #[test]
    fn test_explicit_executions_win_over_metric_lists() {
        let mut source = sample_episode();
        source.record_execution(json!({"answer": "Paris"}), MatchOutcome::Match, 0.0, 1.0);
        let mut value = source.to_value().unwrap();
        value["metrics"] = json!({
            "match": [0.0, 0.0],
            "drift": [1.0, 1.0],
            "coherence": [0.0, 0.0],
        });

        let ep = Episode::from_value(value).unwrap();
        assert_eq!(ep.executions(), source.executions());
    }

    #[test]
    fn test_malformed_metric_lists_are_rejected() {
        let uneven = Episode::from_value(json!({
            "inputs": {"q": "a"},
            "expected_outputs": {"x": 1},
            "metrics": {"match": [1.0], "drift": [], "coherence": [0.9]},
        }))
        .unwrap_err();
        assert!(uneven.to_string().contains("differ in length"));

        let bad_score = Episode::from_value(json!({
            "inputs": {"q": "a"},
            "expected_outputs": {"x": 1},
            "metrics": {"match": [0.7], "drift": [0.1], "coherence": [0.9]},
        }))
        .unwrap_err();
        assert!(bad_score.to_string().contains("0.7"));
    }
}
