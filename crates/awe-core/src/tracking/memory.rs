//! In-memory tracking sink (testing and local inspection).

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::sink::{Labels, MetricValues, RunId, TrackingError, TrackingResult, TrackingSink};

/// Everything recorded against one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRun {
    pub run_id: RunId,
    pub experiment: String,
    pub tags: Labels,
    pub params: Labels,
    pub metrics: MetricValues,
    pub artifacts: BTreeMap<String, Value>,
    pub ended: bool,
}

/// Sink that keeps runs in a `Vec` in open order.
///
/// [`MemoryTrackingSink::unreachable`] builds a sink whose every call fails,
/// for exercising degrade-gracefully paths.
#[derive(Debug, Default)]
pub struct MemoryTrackingSink {
    runs: Mutex<Vec<TrackedRun>>,
    unreachable: bool,
}

impl MemoryTrackingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            unreachable: true,
        }
    }

    /// Snapshot of all recorded runs.
    pub fn runs(&self) -> Vec<TrackedRun> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackedRun>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_reachable(&self) -> TrackingResult<()> {
        if self.unreachable {
            Err(TrackingError::Unreachable("memory sink offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_open_run<F>(&self, run: &RunId, f: F) -> TrackingResult<()>
    where
        F: FnOnce(&mut TrackedRun),
    {
        self.check_reachable()?;
        let mut runs = self.lock();
        let tracked = runs
            .iter_mut()
            .find(|r| &r.run_id == run)
            .ok_or_else(|| TrackingError::RunNotFound(run.clone()))?;
        if tracked.ended {
            return Err(TrackingError::RunEnded(run.clone()));
        }
        f(tracked);
        Ok(())
    }
}

impl TrackingSink for MemoryTrackingSink {
    fn start_run(&self, experiment: &str, tags: &Labels) -> TrackingResult<RunId> {
        self.check_reachable()?;
        let mut runs = self.lock();
        let run_id = RunId::new(format!("run-{}", runs.len() + 1));
        runs.push(TrackedRun {
            run_id: run_id.clone(),
            experiment: experiment.to_string(),
            tags: tags.clone(),
            params: Labels::new(),
            metrics: MetricValues::new(),
            artifacts: BTreeMap::new(),
            ended: false,
        });
        Ok(run_id)
    }

    fn log_params(&self, run: &RunId, params: &Labels) -> TrackingResult<()> {
        self.with_open_run(run, |r| r.params.extend(params.clone()))
    }

    fn log_metrics(&self, run: &RunId, metrics: &MetricValues) -> TrackingResult<()> {
        self.with_open_run(run, |r| r.metrics.extend(metrics.clone()))
    }

    fn log_artifact(&self, run: &RunId, name: &str, content: &Value) -> TrackingResult<()> {
        self.with_open_run(run, |r| {
            r.artifacts.insert(name.to_string(), content.clone());
        })
    }

    fn end_run(&self, run: &RunId) -> TrackingResult<()> {
        self.with_open_run(run, |r| r.ended = true)
    }
}
