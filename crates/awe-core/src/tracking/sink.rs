//! Tracking sink interface: the external system that persists runs,
//! parameters, metrics and artifacts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Identifier of a run opened on a sink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id, for sinks that do not assign their own.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by a tracking sink.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("tracking backend unreachable: {0}")]
    Unreachable(String),

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("run already ended: {0}")]
    RunEnded(RunId),

    #[error("tracking backend rejected request: {0}")]
    Rejected(String),
}

pub type TrackingResult<T> = std::result::Result<T, TrackingError>;

/// String-keyed tags or params.
pub type Labels = BTreeMap<String, String>;

/// Named numeric metrics.
pub type MetricValues = BTreeMap<String, f64>;

/// Backend-agnostic tracking interface.
pub trait TrackingSink: Send + Sync {
    /// Open a run under `experiment` with the given tags.
    fn start_run(&self, experiment: &str, tags: &Labels) -> TrackingResult<RunId>;

    fn log_params(&self, run: &RunId, params: &Labels) -> TrackingResult<()>;

    fn log_metrics(&self, run: &RunId, metrics: &MetricValues) -> TrackingResult<()>;

    /// Attach a JSON artifact to the run under `name`.
    fn log_artifact(&self, run: &RunId, name: &str, content: &Value) -> TrackingResult<()>;

    fn end_run(&self, run: &RunId) -> TrackingResult<()>;
}

/// Sink that writes every call as a structured `tracing` event.
///
/// Useful when no tracking server is configured; the log pipeline becomes
/// the record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTrackingSink;

impl TrackingSink for LogTrackingSink {
    fn start_run(&self, experiment: &str, tags: &Labels) -> TrackingResult<RunId> {
        let run = RunId::generate();
        info!(
            event = "tracking.run_started",
            run_id = %run,
            experiment = %experiment,
            tags = ?tags
        );
        Ok(run)
    }

    fn log_params(&self, run: &RunId, params: &Labels) -> TrackingResult<()> {
        info!(event = "tracking.params", run_id = %run, params = ?params);
        Ok(())
    }

    fn log_metrics(&self, run: &RunId, metrics: &MetricValues) -> TrackingResult<()> {
        info!(event = "tracking.metrics", run_id = %run, metrics = ?metrics);
        Ok(())
    }

    fn log_artifact(&self, run: &RunId, name: &str, content: &Value) -> TrackingResult<()> {
        info!(event = "tracking.artifact", run_id = %run, name = %name, content = %content);
        Ok(())
    }

    fn end_run(&self, run: &RunId) -> TrackingResult<()> {
        info!(event = "tracking.run_ended", run_id = %run);
        Ok(())
    }
}
