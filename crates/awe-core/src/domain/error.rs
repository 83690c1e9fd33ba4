//! Domain-level error taxonomy for AWE.

/// Structural problems with an episode, raised by
/// [`validate_episode`](crate::invariants::validate_episode).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("episode_id must be a non-empty string")]
    EmptyEpisodeId,

    #[error("{field} must be a mapping")]
    NotAMapping { field: &'static str },

    #[error("{field} cannot be empty")]
    EmptyMapping { field: &'static str },

    #[error("{field} must be a non-empty string when present")]
    BlankField { field: &'static str },

    #[error("token_counts['{key}'] must be a non-negative integer, got {value}")]
    NegativeTokenCount { key: String, value: i64 },
}

/// AWE domain errors.
#[derive(Debug, thiserror::Error)]
pub enum AweError {
    /// Wrong shape handed to the evaluator. Fatal to the single call.
    #[error("{field} must be a JSON object, got {found}")]
    NotAMapping {
        field: &'static str,
        found: &'static str,
    },

    #[error("batch item {index} (episode {episode_id}) failed: {source}")]
    BatchItem {
        index: usize,
        episode_id: String,
        #[source]
        source: Box<AweError>,
    },

    #[error("invalid episode: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for AWE domain operations.
pub type Result<T> = std::result::Result<T, AweError>;

/// Name of the JSON type of `value`, used in error messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::NotAMapping { field: "inputs" };
        assert_eq!(err.to_string(), "inputs must be a mapping");

        let err = ValidationError::NegativeTokenCount {
            key: "input_tokens".to_string(),
            value: -3,
        };
        let msg = err.to_string();
        assert!(msg.contains("input_tokens"));
        assert!(msg.contains("-3"));
    }

    #[test]
    fn test_not_a_mapping_names_found_type() {
        let err = AweError::NotAMapping {
            field: "actual_outputs",
            found: json_type_name(&serde_json::json!([1, 2])),
        };
        assert_eq!(
            err.to_string(),
            "actual_outputs must be a JSON object, got array"
        );
    }

    #[test]
    fn test_batch_item_wraps_source() {
        let err = AweError::BatchItem {
            index: 2,
            episode_id: "ep-7".to_string(),
            source: Box::new(AweError::NotAMapping {
                field: "actual_outputs",
                found: "null",
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("batch item 2"));
        assert!(msg.contains("ep-7"));
        assert!(msg.contains("got null"));
    }

    #[test]
    fn test_validation_converts_into_awe_error() {
        let err: AweError = ValidationError::EmptyEpisodeId.into();
        assert!(err.to_string().contains("invalid episode"));
    }
}
