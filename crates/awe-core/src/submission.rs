//! Batch submission payloads.
//!
//! A submission is a JSON document of the form
//!
//! ```json
//! {
//!   "batch_id": "nightly-42",
//!   "episodes": [
//!     {"episode": { /* serialized Episode */ }, "actual_outputs": {"answer": "Paris"}}
//!   ]
//! }
//! ```
//!
//! Parsing is best effort: malformed items are skipped, and the payload is
//! only rejected when its outer shape is wrong or no item survives.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::domain::error::json_type_name;
use crate::domain::{AweError, Episode};
use crate::invariants::validate_episode;
use crate::scoring::{BatchResult, EpisodeEvaluator};

/// Batch id used when neither the caller nor the payload supplies one.
pub const DEFAULT_BATCH_ID: &str = "batch_001";

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("payload must be a JSON object, got {0}")]
    PayloadNotAnObject(&'static str),

    #[error("payload 'episodes' must be a list")]
    EpisodesNotAList,

    #[error("no valid episodes found in payload")]
    NoValidEpisodes,

    #[error(transparent)]
    Evaluation(#[from] AweError),
}

/// Parse `payload` into `(episode, actual_outputs)` pairs, in payload order.
///
/// An item is skipped when it is not an object, when `episode` or
/// `actual_outputs` is not an object, or when the episode fails to
/// deserialize or validate.
pub fn parse_submission_payload(
    payload: &Value,
) -> Result<Vec<(Episode, Value)>, SubmissionError> {
    let obj = payload
        .as_object()
        .ok_or_else(|| SubmissionError::PayloadNotAnObject(json_type_name(payload)))?;

    let items = obj
        .get("episodes")
        .and_then(Value::as_array)
        .ok_or(SubmissionError::EpisodesNotAList)?;

    let mut pairs = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match parse_item(item) {
            Ok(pair) => pairs.push(pair),
            Err(reason) => debug!(index, reason = %reason, "skipping submission item"),
        }
    }

    if pairs.is_empty() {
        return Err(SubmissionError::NoValidEpisodes);
    }
    Ok(pairs)
}

fn parse_item(item: &Value) -> Result<(Episode, Value), String> {
    let item = item
        .as_object()
        .ok_or_else(|| format!("item is {}, not an object", json_type_name(item)))?;

    let episode = match item.get("episode") {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => return Err("'episode' is not an object".to_string()),
    };
    let actual = match item.get("actual_outputs") {
        Some(v @ Value::Object(_)) => v.clone(),
        _ => return Err("'actual_outputs' is not an object".to_string()),
    };

    let episode = Episode::from_value(episode).map_err(|e| e.to_string())?;
    validate_episode(&episode).map_err(|e| e.to_string())?;
    Ok((episode, actual))
}

/// Batch id precedence: `explicit`, then the payload's `batch_id` string,
/// then [`DEFAULT_BATCH_ID`].
pub fn resolve_batch_id<'a>(payload: &'a Value, explicit: Option<&'a str>) -> &'a str {
    explicit
        .or_else(|| payload.get("batch_id").and_then(Value::as_str))
        .unwrap_or(DEFAULT_BATCH_ID)
}

/// Parse and evaluate `payload` as one batch, named by [`resolve_batch_id`].
pub fn evaluate_submission_payload(
    payload: &Value,
    evaluator: &EpisodeEvaluator,
    batch_id: Option<&str>,
) -> Result<BatchResult, SubmissionError> {
    let mut pairs = parse_submission_payload(payload)?;
    let batch_id = resolve_batch_id(payload, batch_id);
    Ok(evaluator.evaluate_batch(batch_id, &mut pairs)?)
}
