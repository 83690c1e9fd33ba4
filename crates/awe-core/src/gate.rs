//! Evaluation gate rules engine.
//!
//! Checks a set of executed [`Episode`]s against a [`GateRuleSet`] and
//! produces a [`GateVerdict`], the pass/fail decision used to block a
//! rollout. Each rule is backed by one of the assertions in
//! [`invariants`](crate::invariants), so rules see the latest execution of
//! each episode only.

use serde::{Deserialize, Serialize};

use crate::domain::Episode;
use crate::invariants::{
    assert_high_coherence_with_policy, assert_idempotent_with_policy,
    assert_low_drift_with_policy, AssertionFailure, UnrecordedPolicy,
};
use crate::obs;

// ---------------------------------------------------------------------------
// Thresholds and rules
// ---------------------------------------------------------------------------

/// Thresholds referenced by [`GateRule`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateThresholds {
    /// Minimum fraction of episodes whose latest run matched.
    pub min_idempotency: f64,
    /// Maximum mean drift across latest runs.
    pub max_drift: f64,
    /// Minimum mean coherence across latest runs.
    pub min_coherence: f64,
    /// Stop at the first violation.
    pub fail_fast: bool,
    pub unrecorded: UnrecordedPolicy,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_idempotency: 0.9,
            max_drift: 0.1,
            min_coherence: 0.8,
            fail_fast: false,
            unrecorded: UnrecordedPolicy::Exclude,
        }
    }
}

/// A single gate rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GateRule {
    /// Idempotency rate must meet `GateThresholds::min_idempotency`.
    MinIdempotency,
    /// Mean drift must not exceed `GateThresholds::max_drift`.
    MaxDrift,
    /// Mean coherence must meet `GateThresholds::min_coherence`.
    MinCoherence,
}

/// A set of gate rules plus the thresholds they reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateRuleSet {
    #[serde(default)]
    pub thresholds: GateThresholds,
    pub rules: Vec<GateRule>,
}

impl GateRuleSet {
    /// Default thresholds with all three rules.
    pub fn standard() -> Self {
        Self {
            thresholds: GateThresholds::default(),
            rules: vec![
                GateRule::MinIdempotency,
                GateRule::MaxDrift,
                GateRule::MinCoherence,
            ],
        }
    }

    pub fn with_rule(mut self, rule: GateRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_thresholds(mut self, thresholds: GateThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// A single rule violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub rule: GateRule,
    /// Human-readable explanation.
    pub reason: String,
}

/// The outcome of evaluating a gate rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    /// Episodes the gate was evaluated over.
    pub episodes: usize,
    /// Violations found (empty when passed).
    pub violations: Vec<Violation>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Evaluate `episodes` against `rule_set`.
///
/// When `thresholds.fail_fast` is true, evaluation stops at the first
/// violation. An empty episode set passes every rule.
pub fn evaluate_gate(rule_set: &GateRuleSet, episodes: &[Episode]) -> GateVerdict {
    let mut violations = Vec::new();

    for rule in &rule_set.rules {
        if let Some(v) = check_rule(*rule, &rule_set.thresholds, episodes) {
            violations.push(v);
            if rule_set.thresholds.fail_fast {
                break;
            }
        }
    }

    obs::emit_gate_evaluated(episodes.len(), violations.len());
    GateVerdict {
        episodes: episodes.len(),
        violations,
    }
}

fn check_rule(
    rule: GateRule,
    thresholds: &GateThresholds,
    episodes: &[Episode],
) -> Option<Violation> {
    let policy = thresholds.unrecorded;
    let outcome = match rule {
        GateRule::MinIdempotency => {
            assert_idempotent_with_policy(episodes, thresholds.min_idempotency, policy)
        }
        GateRule::MaxDrift => assert_low_drift_with_policy(episodes, thresholds.max_drift, policy),
        GateRule::MinCoherence => {
            assert_high_coherence_with_policy(episodes, thresholds.min_coherence, policy)
        }
    };

    outcome.err().map(|failure: AssertionFailure| Violation {
        rule,
        reason: failure.to_string(),
    })
}
