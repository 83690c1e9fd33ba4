//! AWE Core Library
//!
//! Episode evaluation for AI workflows: drift, coherence, and idempotency
//! scoring, statistical assertions and gates over episode sets, and
//! experiment tracking behind a pluggable sink.

pub mod coherence;
pub mod domain;
pub mod drift;
pub mod gate;
pub mod invariants;
pub mod metrics;
pub mod obs;
pub mod scoring;
pub mod stats;
pub mod submission;
pub mod telemetry;
pub mod tracking;

pub use coherence::{CoherenceScorer, HeuristicCoherence};

pub use domain::digest::{canonical_json, value_digest};
pub use domain::{
    AweError, Episode, EpisodeRecord, EpisodeStatus, ExecutionRecord, MatchOutcome,
    MetricsSummary, Result, StepEvaluation, StepMatchOutcome, TokenCounts, ValidationError,
};

pub use drift::{levenshtein, output_drift, structurally_equal, value_drift};

pub use gate::{evaluate_gate, GateRule, GateRuleSet, GateThresholds, GateVerdict, Violation};

pub use invariants::{
    assert_high_coherence, assert_high_coherence_with_policy, assert_idempotent,
    assert_idempotent_with_policy, assert_low_drift, assert_low_drift_with_policy,
    validate_episode, AssertionFailure, AssertionStats, UnrecordedPolicy,
};

pub use metrics::METRICS;
pub use obs::{
    emit_batch_evaluated, emit_episode_evaluated, emit_gate_evaluated, emit_tracking_sink_error,
    EvalSpan,
};

pub use scoring::{
    BatchResult, BatchSummary, EpisodeEvaluator, EpisodeResult, EvaluationMetrics,
    EvaluatorConfig,
};

pub use submission::{
    evaluate_submission_payload, parse_submission_payload, resolve_batch_id, SubmissionError,
    DEFAULT_BATCH_ID,
};

pub use telemetry::init_tracing;

pub use tracking::{
    Labels, LogTrackingSink, MemoryTrackingSink, MetricValues, MetricsTracker, RunId,
    TrackedRun, TrackingError, TrackingResult, TrackingRun, TrackingSink, DEFAULT_EXPERIMENT,
    EVALUATION_METADATA_ARTIFACT,
};

/// AWE version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
