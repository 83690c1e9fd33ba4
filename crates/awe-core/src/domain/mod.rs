//! Domain models for AWE.
//!
//! Canonical definitions for the core entities:
//! - `Episode`: a workflow unit and its execution history
//! - `EpisodeRecord`: the row shape handed to the structured store
//! - Error taxonomy shared by every component

pub mod digest;
pub mod episode;
pub mod error;
pub mod record;

// Re-export main types and errors
pub use episode::{Episode, ExecutionRecord, MatchOutcome, MetricsSummary, TokenCounts};
pub use error::{AweError, Result, ValidationError};
pub use record::{EpisodeRecord, EpisodeStatus, StepEvaluation, StepMatchOutcome};
