//! Coherence scoring: internal consistency of an actual output, independent
//! of what was expected.
//!
//! Scoring is pluggable through [`CoherenceScorer`]. The default
//! [`HeuristicCoherence`] only inspects the output mapping; it never looks at
//! the prompt or the expected outputs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A pure function from an output mapping to a score in `[0, 1]`.
pub trait CoherenceScorer: Send + Sync {
    fn score(&self, outputs: &Map<String, Value>) -> f64;
}

impl<F> CoherenceScorer for F
where
    F: Fn(&Map<String, Value>) -> f64 + Send + Sync,
{
    fn score(&self, outputs: &Map<String, Value>) -> f64 {
        self(outputs)
    }
}

fn default_bounded_keys() -> Vec<String> {
    ["confidence", "score", "probability"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Weighted blend of three checks:
///
/// - presence (weight 0.4): share of keys, outputs plus `required_keys`,
///   whose value is present and non-empty
/// - type consistency (weight 0.4): share of present values having the most
///   common JSON type
/// - bounds (weight 0.2): share of `bounded_keys` numeric fields inside
///   `[0, 1]`; 1.0 when no such field exists
///
/// An empty output scores 0.5 and an output with no present value scores 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicCoherence {
    pub required_keys: Vec<String>,
    pub bounded_keys: Vec<String>,
}

impl Default for HeuristicCoherence {
    fn default() -> Self {
        Self {
            required_keys: Vec::new(),
            bounded_keys: default_bounded_keys(),
        }
    }
}

impl HeuristicCoherence {
    pub fn with_required_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

const PRESENCE_WEIGHT: f64 = 0.4;
const TYPE_WEIGHT: f64 = 0.4;
const BOUNDS_WEIGHT: f64 = 0.2;

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn type_tag(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

impl CoherenceScorer for HeuristicCoherence {
    fn score(&self, outputs: &Map<String, Value>) -> f64 {
        if outputs.is_empty() && self.required_keys.is_empty() {
            return 0.5;
        }

        let keys: BTreeSet<&str> = outputs
            .keys()
            .map(String::as_str)
            .chain(self.required_keys.iter().map(String::as_str))
            .collect();

        let present: Vec<&Value> = keys
            .iter()
            .filter_map(|k| outputs.get(*k))
            .filter(|v| is_present(v))
            .collect();

        if present.is_empty() {
            return 0.0;
        }

        let presence = present.len() as f64 / keys.len() as f64;

        let mut type_counts: BTreeMap<u8, usize> = BTreeMap::new();
        for v in &present {
            *type_counts.entry(type_tag(v)).or_default() += 1;
        }
        let dominant = type_counts.values().copied().max().unwrap_or(0);
        let type_consistency = dominant as f64 / present.len() as f64;

        let bounded: Vec<f64> = self
            .bounded_keys
            .iter()
            .filter_map(|k| outputs.get(k).and_then(Value::as_f64))
            .collect();
        let bounds = if bounded.is_empty() {
            1.0
        } else {
            let within = bounded.iter().filter(|v| (0.0..=1.0).contains(*v)).count();
            within as f64 / bounded.len() as f64
        };

        let score =
            PRESENCE_WEIGHT * presence + TYPE_WEIGHT * type_consistency + BOUNDS_WEIGHT * bounds;
        score.clamp(0.0, 1.0)
    }
}
