//! AWE - AI Workflow Evaluator CLI
//!
//! The `awe` command runs submission payloads through the episode evaluator.
//!
//! ## Commands
//!
//! - `evaluate`: Evaluate a submission as one batch and print the result
//! - `validate`: Check which submission items would be accepted
//! - `gate`: Evaluate a submission and fail unless the gate passes
//! - `export`: Evaluate a submission and print persistence records

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use awe_core::{
    evaluate_gate, parse_submission_payload, resolve_batch_id, BatchResult, EpisodeEvaluator,
    EpisodeRecord, EvaluatorConfig, GateRuleSet, GateThresholds, GateVerdict, LogTrackingSink,
    MetricsTracker, DEFAULT_EXPERIMENT, METRICS,
};

#[derive(Parser)]
#[command(name = "awe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AI Workflow Evaluator (AWE)", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(short, long, global = true, env = "AWE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a submission payload as one batch
    Evaluate {
        /// Submission payload file (JSON), or `-` for stdin
        payload: PathBuf,

        /// Batch id (overrides the payload's `batch_id`)
        #[arg(short, long)]
        batch_id: Option<String>,
    },

    /// Report the submission items that parse and validate
    Validate {
        /// Submission payload file (JSON), or `-` for stdin
        payload: PathBuf,
    },

    /// Evaluate a submission and check it against the gate thresholds
    Gate {
        /// Submission payload file (JSON), or `-` for stdin
        payload: PathBuf,

        /// Batch id (overrides the payload's `batch_id`)
        #[arg(short, long)]
        batch_id: Option<String>,

        /// Override minimum idempotency rate
        #[arg(long)]
        min_idempotency: Option<f64>,

        /// Override maximum mean drift
        #[arg(long)]
        max_drift: Option<f64>,

        /// Override minimum mean coherence
        #[arg(long)]
        min_coherence: Option<f64>,

        /// Stop at the first violated rule
        #[arg(long)]
        fail_fast: bool,
    },

    /// Evaluate a submission and print one persistence record per episode
    Export {
        /// Submission payload file (JSON), or `-` for stdin
        payload: PathBuf,

        /// Version label stamped on every record
        #[arg(long, default_value = "1")]
        episode_version: String,
    },
}

/// On-disk configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct AweConfig {
    evaluator: EvaluatorConfig,
    gate: GateThresholds,
    tracking: TrackingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct TrackingConfig {
    /// Emit tracking runs as log events.
    enabled: bool,
    experiment: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            experiment: DEFAULT_EXPERIMENT.to_string(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    awe_core::init_tracing(cli.json, level);

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AweConfig::default(),
    };
    let evaluator = build_evaluator(&config);

    let output = match cli.command {
        Commands::Evaluate { payload, batch_id } => {
            let payload = read_payload(&payload)?;
            let (batch, _) = cmd_evaluate(&evaluator, &payload, batch_id.as_deref())?;
            serde_json::to_value(&batch)?
        }
        Commands::Validate { payload } => {
            let payload = read_payload(&payload)?;
            cmd_validate(&payload)?
        }
        Commands::Gate {
            payload,
            batch_id,
            min_idempotency,
            max_drift,
            min_coherence,
            fail_fast,
        } => {
            let payload = read_payload(&payload)?;
            let mut thresholds = config.gate.clone();
            if let Some(v) = min_idempotency {
                thresholds.min_idempotency = v;
            }
            if let Some(v) = max_drift {
                thresholds.max_drift = v;
            }
            if let Some(v) = min_coherence {
                thresholds.min_coherence = v;
            }
            thresholds.fail_fast |= fail_fast;

            let verdict = cmd_gate(&evaluator, &payload, batch_id.as_deref(), thresholds)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            METRICS.flush();
            if !verdict.passed() {
                bail!("gate failed with {} violation(s)", verdict.violations.len());
            }
            return Ok(());
        }
        Commands::Export {
            payload,
            episode_version,
        } => {
            let payload = read_payload(&payload)?;
            let records = cmd_export(&evaluator, &payload, &episode_version)?;
            serde_json::to_value(&records)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    METRICS.flush();
    Ok(())
}

fn load_config(path: &Path) -> Result<AweConfig> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).context(format!("Failed to parse config file: {:?}", path))
}

fn build_evaluator(config: &AweConfig) -> EpisodeEvaluator {
    let evaluator = EpisodeEvaluator::new(config.evaluator.clone());
    if config.tracking.enabled {
        let tracker = MetricsTracker::new(Arc::new(LogTrackingSink), &config.tracking.experiment);
        evaluator.with_tracker(tracker)
    } else {
        evaluator
    }
}

fn read_payload(path: &Path) -> Result<Value> {
    let content = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read payload from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).context(format!("Failed to read payload: {:?}", path))?
    };
    serde_json::from_str(&content).context("Failed to parse payload as JSON")
}

/// Evaluate `payload`, returning the batch and the episodes with their new
/// execution records.
fn cmd_evaluate(
    evaluator: &EpisodeEvaluator,
    payload: &Value,
    batch_id: Option<&str>,
) -> Result<(BatchResult, Vec<awe_core::Episode>)> {
    let mut pairs = parse_submission_payload(payload).context("Invalid submission payload")?;
    let batch_id = resolve_batch_id(payload, batch_id);

    let batch = evaluator
        .evaluate_batch(batch_id, &mut pairs)
        .context(format!("Failed to evaluate batch {}", batch_id))?;
    info!(
        batch_id = %batch.batch_id,
        episodes = batch.episodes_count,
        idempotency_rate = batch.summary.idempotency_rate,
        "batch complete"
    );

    let episodes = pairs.into_iter().map(|(episode, _)| episode).collect();
    Ok((batch, episodes))
}

fn cmd_validate(payload: &Value) -> Result<Value> {
    let total = payload
        .get("episodes")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    // parsing validates every episode it keeps
    let pairs = parse_submission_payload(payload).context("Invalid submission payload")?;
    let accepted: Vec<String> = pairs
        .iter()
        .map(|(episode, _)| episode.episode_id().to_string())
        .collect();

    Ok(json!({
        "total": total,
        "accepted": accepted.len(),
        "skipped": total - accepted.len(),
        "episode_ids": accepted,
    }))
}

fn cmd_gate(
    evaluator: &EpisodeEvaluator,
    payload: &Value,
    batch_id: Option<&str>,
    thresholds: GateThresholds,
) -> Result<GateVerdict> {
    let (_, episodes) = cmd_evaluate(evaluator, payload, batch_id)?;
    let rule_set = GateRuleSet::standard().with_thresholds(thresholds);
    Ok(evaluate_gate(&rule_set, &episodes))
}

fn cmd_export(
    evaluator: &EpisodeEvaluator,
    payload: &Value,
    episode_version: &str,
) -> Result<Vec<EpisodeRecord>> {
    let (_, episodes) = cmd_evaluate(evaluator, payload, None)?;
    episodes
        .iter()
        .map(|episode| {
            EpisodeRecord::from_episode(episode, episode_version)
                .context(format!("Failed to export episode {}", episode.episode_id()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use awe_core::Episode;

    fn payload() -> Value {
        let exact = Episode::new(json!({"q": "capital of France"}), json!({"answer": "Paris"}))
            .with_id("ep-exact");
        let wrong = Episode::new(json!({"q": "capital of Germany"}), json!({"answer": "Paris"}))
            .with_id("ep-wrong");
        json!({
            "batch_id": "cli-batch",
            "episodes": [
                {"episode": exact.to_value().unwrap(), "actual_outputs": {"answer": "Paris"}},
                {"episode": wrong.to_value().unwrap(), "actual_outputs": {"answer": "Berlin"}},
                {"episode": "bad", "actual_outputs": {}},
            ]
        })
    }

    #[test]
    fn test_load_config_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("awe.toml");
        std::fs::write(
            &path,
            r#"
[evaluator]
high_drift_threshold = 0.7

[gate]
min_idempotency = 0.5

[tracking]
enabled = true
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.evaluator.high_drift_threshold, 0.7);
        assert_eq!(config.evaluator.numeric_tolerance, 1e-6);
        assert_eq!(config.gate.min_idempotency, 0.5);
        assert_eq!(config.gate.max_drift, 0.1);
        assert!(config.tracking.enabled);
        assert_eq!(config.tracking.experiment, DEFAULT_EXPERIMENT);
    }

    #[test]
    fn test_load_config_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("awe.toml");
        std::fs::write(&path, "[evaluator\nmatch_drift = ").unwrap();
        assert!(load_config(&path).is_err());
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_read_payload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.json");
        std::fs::write(&path, serde_json::to_string(&payload()).unwrap()).unwrap();
        let value = read_payload(&path).unwrap();
        assert_eq!(value["batch_id"], "cli-batch");
    }

    #[test]
    fn test_cmd_evaluate_uses_payload_batch_id() {
        let evaluator = EpisodeEvaluator::default();
        let (batch, episodes) = cmd_evaluate(&evaluator, &payload(), None).unwrap();
        assert_eq!(batch.batch_id, "cli-batch");
        assert_eq!(batch.episodes_count, 2);
        assert_eq!(batch.summary.match_count, 1);
        assert!(episodes.iter().all(|e| e.execution_count() == 1));
    }

    #[test]
    fn test_cmd_validate_counts_skipped() {
        let report = cmd_validate(&payload()).unwrap();
        assert_eq!(report["total"], 3);
        assert_eq!(report["accepted"], 2);
        assert_eq!(report["skipped"], 1);
    }

    #[test]
    fn test_cmd_gate_fails_on_mismatch() {
        let evaluator = EpisodeEvaluator::default();
        let verdict =
            cmd_gate(&evaluator, &payload(), None, GateThresholds::default()).unwrap();
        assert!(!verdict.passed());

        let lenient = GateThresholds {
            min_idempotency: 0.5,
            max_drift: 1.0,
            min_coherence: 0.0,
            ..GateThresholds::default()
        };
        let verdict = cmd_gate(&evaluator, &payload(), None, lenient).unwrap();
        assert!(verdict.passed(), "{:?}", verdict.violations);
    }

    #[test]
    fn test_cmd_export_records() {
        let evaluator = EpisodeEvaluator::default();
        let records = cmd_export(&evaluator, &payload(), "v7").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].episode_id, "ep-exact");
        assert_eq!(records[0].episode_version, "v7");
        assert_eq!(records[0].execution_count, 1);
    }

    #[test]
    fn test_tracking_enabled_builds_tracker() {
        let config = AweConfig {
            tracking: TrackingConfig {
                enabled: true,
                ..TrackingConfig::default()
            },
            ..AweConfig::default()
        };
        let evaluator = build_evaluator(&config);
        let (batch, _) = cmd_evaluate(&evaluator, &payload(), Some("tracked")).unwrap();
        assert_eq!(batch.batch_id, "tracked");
    }
}
