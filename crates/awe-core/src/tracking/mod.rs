//! Metrics tracking: turns evaluator output into runs on an external
//! [`TrackingSink`] without owning persistence.
//!
//! Runs are scoped. [`MetricsTracker::start_run`] returns a [`TrackingRun`]
//! guard and dropping the guard ends the run, so a run is never reused
//! across unrelated logical runs.
//!
//! Sink failures never reach the caller: they are logged at `warn!`,
//! counted in [`METRICS`](crate::metrics::METRICS), and swallowed.

pub mod memory;
pub mod sink;

use std::sync::Arc;

use serde_json::Value;

use crate::metrics::METRICS;
use crate::obs;
use crate::scoring::{BatchResult, EvaluationMetrics};

pub use memory::{MemoryTrackingSink, TrackedRun};
pub use sink::{
    Labels, LogTrackingSink, MetricValues, RunId, TrackingError, TrackingResult, TrackingSink,
};

/// Default experiment name for evaluation runs.
pub const DEFAULT_EXPERIMENT: &str = "episode_evaluation";

/// Name of the artifact carrying per-evaluation metadata.
pub const EVALUATION_METADATA_ARTIFACT: &str = "evaluation_metadata.json";

const COMPONENT: &str = "evaluator";

fn report_failure(operation: &'static str, run: Option<&RunId>, err: &TrackingError) {
    METRICS.inc_tracking_failures();
    obs::emit_tracking_sink_error(operation, run.map(RunId::as_str), err);
}

/// Handle on the tracking sink for one experiment.
#[derive(Clone)]
pub struct MetricsTracker {
    sink: Arc<dyn TrackingSink>,
    experiment: String,
}

impl std::fmt::Debug for MetricsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsTracker")
            .field("experiment", &self.experiment)
            .finish_non_exhaustive()
    }
}

impl MetricsTracker {
    pub fn new(sink: Arc<dyn TrackingSink>, experiment: impl Into<String>) -> Self {
        Self {
            sink,
            experiment: experiment.into(),
        }
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Open a run. Returns `None` (after logging) when the sink is unreachable.
    pub fn start_run(&self, tags: &Labels) -> Option<TrackingRun> {
        match self.sink.start_run(&self.experiment, tags) {
            Ok(run_id) => Some(TrackingRun {
                sink: Arc::clone(&self.sink),
                run_id,
                ended: false,
            }),
            Err(err) => {
                report_failure("start_run", None, &err);
                None
            }
        }
    }

    /// Record one evaluation in a run of its own.
    ///
    /// Tags: `extra_tags`, then `episode_id`, `model` and `component`, which
    /// override caller tags of the same name.
    /// Params: `episode_id`. Metrics: drift, coherence and idempotency scores
    /// and token counts. `metadata`, if given, is attached as
    /// [`EVALUATION_METADATA_ARTIFACT`].
    pub fn log_evaluation(
        &self,
        episode_id: &str,
        metrics: &EvaluationMetrics,
        model_name: Option<&str>,
        extra_tags: &Labels,
        metadata: Option<&Value>,
    ) {
        let mut tags = extra_tags.clone();
        tags.insert("episode_id".to_string(), episode_id.to_string());
        tags.insert(
            "model".to_string(),
            model_name.unwrap_or("unknown").to_string(),
        );
        tags.insert("component".to_string(), COMPONENT.to_string());

        if let Some(run) = self.start_run(&tags) {
            run.log_evaluation(episode_id, metrics, metadata);
        }
    }

    /// Record a batch summary in a run of its own.
    pub fn log_batch(&self, batch_id: &str, batch: &BatchResult) {
        let mut tags = Labels::new();
        tags.insert("batch_id".to_string(), batch_id.to_string());
        tags.insert("component".to_string(), COMPONENT.to_string());

        if let Some(run) = self.start_run(&tags) {
            run.log_batch(batch_id, batch);
        }
    }
}

/// An open run. Ends on drop.
pub struct TrackingRun {
    sink: Arc<dyn TrackingSink>,
    run_id: RunId,
    ended: bool,
}

impl TrackingRun {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn log_params(&self, params: &Labels) {
        if let Err(err) = self.sink.log_params(&self.run_id, params) {
            report_failure("log_params", Some(&self.run_id), &err);
        }
    }

    pub fn log_metrics(&self, metrics: &MetricValues) {
        if let Err(err) = self.sink.log_metrics(&self.run_id, metrics) {
            report_failure("log_metrics", Some(&self.run_id), &err);
        }
    }

    pub fn log_artifact(&self, name: &str, content: &Value) {
        if let Err(err) = self.sink.log_artifact(&self.run_id, name, content) {
            report_failure("log_artifact", Some(&self.run_id), &err);
        }
    }

    pub fn log_evaluation(
        &self,
        episode_id: &str,
        metrics: &EvaluationMetrics,
        metadata: Option<&Value>,
    ) {
        let mut params = Labels::new();
        params.insert("episode_id".to_string(), episode_id.to_string());
        self.log_params(&params);

        let mut values = MetricValues::new();
        values.insert("drift_score".to_string(), metrics.drift);
        values.insert("coherence_score".to_string(), metrics.coherence);
        values.insert("idempotency_score".to_string(), metrics.idempotency);
        values.insert("input_tokens".to_string(), metrics.input_tokens as f64);
        values.insert("output_tokens".to_string(), metrics.output_tokens as f64);
        values.insert("total_tokens".to_string(), metrics.total_tokens as f64);
        self.log_metrics(&values);

        if let Some(metadata) = metadata {
            self.log_artifact(EVALUATION_METADATA_ARTIFACT, metadata);
        }
    }

    pub fn log_batch(&self, batch_id: &str, batch: &BatchResult) {
        let mut params = Labels::new();
        params.insert("batch_id".to_string(), batch_id.to_string());
        params.insert("batch_size".to_string(), batch.episodes_count.to_string());
        self.log_params(&params);

        let summary = &batch.summary;
        let mut values = MetricValues::new();
        values.insert("batch_avg_drift".to_string(), summary.avg_drift);
        values.insert("batch_avg_coherence".to_string(), summary.avg_coherence);
        values.insert("batch_idempotency_rate".to_string(), summary.idempotency_rate);
        values.insert("batch_total_tokens".to_string(), summary.total_tokens as f64);
        self.log_metrics(&values);
    }

    /// End the run now instead of at drop.
    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;
        if let Err(err) = self.sink.end_run(&self.run_id) {
            report_failure("end_run", Some(&self.run_id), &err);
        }
    }
}

impl Drop for TrackingRun {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Memory sink that also counts `end_run` calls.
    #[derive(Default)]
    struct CountingSink {
        inner: MemoryTrackingSink,
        end_calls: AtomicUsize,
    }

    impl TrackingSink for CountingSink {
        fn start_run(&self, experiment: &str, tags: &Labels) -> TrackingResult<RunId> {
            self.inner.start_run(experiment, tags)
        }

        fn log_params(&self, run: &RunId, params: &Labels) -> TrackingResult<()> {
            self.inner.log_params(run, params)
        }

        fn log_metrics(&self, run: &RunId, metrics: &MetricValues) -> TrackingResult<()> {
            self.inner.log_metrics(run, metrics)
        }

        fn log_artifact(&self, run: &RunId, name: &str, content: &Value) -> TrackingResult<()> {
            self.inner.log_artifact(run, name, content)
        }

        fn end_run(&self, run: &RunId) -> TrackingResult<()> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.end_run(run)
        }
    }

    fn tracker_with_memory() -> (MetricsTracker, Arc<MemoryTrackingSink>) {
        let sink = Arc::new(MemoryTrackingSink::new());
        let tracker = MetricsTracker::new(sink.clone(), DEFAULT_EXPERIMENT);
        (tracker, sink)
    }

    fn metrics() -> EvaluationMetrics {
        EvaluationMetrics {
            drift: 0.25,
            coherence: 0.9,
            idempotency: 0.5,
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        }
    }

    #[test]
    fn test_run_ends_on_drop() {
        let (tracker, sink) = tracker_with_memory();
        {
            let run = tracker.start_run(&Labels::new()).unwrap();
            assert_eq!(run.run_id().as_str(), "run-1");
            assert!(!sink.runs()[0].ended);
        }
        assert!(sink.runs()[0].ended);
    }

    #[test]
    fn test_explicit_end_does_not_end_twice() {
        let sink = Arc::new(CountingSink::default());
        let tracker = MetricsTracker::new(sink.clone(), DEFAULT_EXPERIMENT);
        let run = tracker.start_run(&Labels::new()).unwrap();
        run.end();
        assert_eq!(sink.end_calls.load(Ordering::SeqCst), 1);
        assert!(sink.inner.runs()[0].ended);
    }

    #[test]
    fn test_log_evaluation_records_tags_params_metrics() {
        let (tracker, sink) = tracker_with_memory();
        let mut extra = Labels::new();
        extra.insert("suite".to_string(), "nightly".to_string());

        tracker.log_evaluation(
            "ep-1",
            &metrics(),
            Some("gpt-test"),
            &extra,
            Some(&serde_json::json!({"inputs_digest": "abc"})),
        );

        let runs = sink.runs();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.experiment, DEFAULT_EXPERIMENT);
        assert_eq!(run.tags["episode_id"], "ep-1");
        assert_eq!(run.tags["model"], "gpt-test");
        assert_eq!(run.tags["component"], "evaluator");
        assert_eq!(run.tags["suite"], "nightly");
        assert_eq!(run.params["episode_id"], "ep-1");
        assert_eq!(run.metrics["drift_score"], 0.25);
        assert_eq!(run.metrics["coherence_score"], 0.9);
        assert_eq!(run.metrics["idempotency_score"], 0.5);
        assert_eq!(run.metrics["total_tokens"], 15.0);
        assert!(run.artifacts.contains_key(EVALUATION_METADATA_ARTIFACT));
        assert!(run.ended);
    }

    #[test]
    fn test_reserved_tags_override_caller_tags() {
        let (tracker, sink) = tracker_with_memory();
        let mut extra = Labels::new();
        extra.insert("episode_id".to_string(), "other".to_string());
        extra.insert("component".to_string(), "hijacked".to_string());
        extra.insert("suite".to_string(), "nightly".to_string());

        tracker.log_evaluation("ep-1", &metrics(), Some("gpt-test"), &extra, None);

        let tags = &sink.runs()[0].tags;
        assert_eq!(tags["episode_id"], "ep-1");
        assert_eq!(tags["component"], "evaluator");
        assert_eq!(tags["model"], "gpt-test");
        assert_eq!(tags["suite"], "nightly");
    }

    #[test]
    fn test_missing_model_is_tagged_unknown() {
        let (tracker, sink) = tracker_with_memory();
        tracker.log_evaluation("ep-2", &metrics(), None, &Labels::new(), None);
        let runs = sink.runs();
        assert_eq!(runs[0].tags["model"], "unknown");
        assert!(runs[0].artifacts.is_empty());
    }

    #[test]
    fn test_unreachable_sink_is_swallowed() {
        let sink = Arc::new(MemoryTrackingSink::unreachable());
        let tracker = MetricsTracker::new(sink, DEFAULT_EXPERIMENT);
        assert!(tracker.start_run(&Labels::new()).is_none());
        tracker.log_evaluation("ep-3", &metrics(), None, &Labels::new(), None);
    }
}
