//! Error types for the forecast engine
//!
//! Each stage has its own error enum so callers can tell a bad upload
//! (`SchemaError`) from a model that simply lacked history (`AdapterError`)
//! or a run where nothing could be forecast (`EnsembleError`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The uploaded table cannot be mapped onto {date, item, quantity}
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("input table has no header or no rows")]
    EmptyTable,

    #[error("could not infer a {field} column from headers {headers:?}")]
    UnresolvedColumn {
        field: &'static str,
        headers: Vec<String>,
    },

    #[error("column hint '{hint}' for {field} does not match any header")]
    UnknownColumn { field: &'static str, hint: String },

    #[error("no usable rows ({dropped} dropped while parsing)")]
    NoUsableRows { dropped: usize },
}

/// Failure of a single model adapter; recovered by excluding the model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    #[error("{model} needs at least {required} days of history, got {available}")]
    InsufficientHistory {
        model: String,
        required: usize,
        available: usize,
    },

    #[error("{model} training failed: {reason}")]
    Training { model: String, reason: String },
}

impl AdapterError {
    pub fn insufficient(model: &str, required: usize, available: usize) -> Self {
        Self::InsufficientHistory {
            model: model.to_string(),
            required,
            available,
        }
    }

    pub fn training(model: &str, reason: impl Into<String>) -> Self {
        Self::Training {
            model: model.to_string(),
            reason: reason.into(),
        }
    }
}

/// One excluded model and the reason it was excluded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterFailure {
    pub model: String,
    pub reason: String,
}

impl fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.reason)
    }
}

fn join_failures(failures: &[AdapterFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnsembleError {
    /// Every adapter failed; there is no naive fallback
    #[error("no model could produce a forecast ({})", join_failures(.failures))]
    Unavailable { failures: Vec<AdapterFailure> },

    #[error("forecast horizon must be at least one day")]
    InvalidHorizon,

    #[error("backtest holdout must be at least one day")]
    InvalidHoldout,

    #[error("invalid ensemble configuration: {0}")]
    InvalidConfig(String),

    #[error("adapter name '{0}' is registered more than once")]
    DuplicateAdapter(String),

    #[error("ensemble run did not finish within {0:?}")]
    Timeout(Duration),
}

/// Malformed input handed to the evaluator
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid evaluation input: {0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExplanationError {
    #[error("explanation backend returned empty text")]
    Empty,

    #[error("explanation backend failed: {0}")]
    Backend(String),
}

/// Errors surfaced by the end-to-end pipeline, tagged with the item they concern
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("invalid pipeline configuration: {0}")]
    Config(EnsembleError),

    #[error("item '{0}' not present in the upload")]
    UnknownItem(String),

    #[error("item '{item_id}': {source}")]
    Ensemble {
        item_id: String,
        #[source]
        source: EnsembleError,
    },

    #[error("item '{item_id}': {source}")]
    Validation {
        item_id: String,
        #[source]
        source: ValidationError,
    },

    #[error("item '{item_id}' has {available} days, too few to hold out {horizon} for evaluation")]
    TailTooShort {
        item_id: String,
        available: usize,
        horizon: usize,
    },
}

impl PipelineError {
    /// Item the error concerns, if it is item-scoped
    pub fn item_id(&self) -> Option<&str> {
        match self {
            Self::Schema(_) | Self::Config(_) => None,
            Self::UnknownItem(item_id)
            | Self::Ensemble { item_id, .. }
            | Self::Validation { item_id, .. }
            | Self::TailTooShort { item_id, .. } => Some(item_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_lists_every_adapter() {
        let err = EnsembleError::Unavailable {
            failures: vec![
                AdapterFailure {
                    model: "trend_decomposition".to_string(),
                    reason: "too short".to_string(),
                },
                AdapterFailure {
                    model: "sequence_model".to_string(),
                    reason: "diverged".to_string(),
                },
            ],
        };

        let message = err.to_string();
        assert!(message.contains("trend_decomposition: too short"));
        assert!(message.contains("sequence_model: diverged"));
    }

    #[test]
    fn test_pipeline_error_item_id() {
        let err = PipelineError::TailTooShort {
            item_id: "apples".to_string(),
            available: 5,
            horizon: 7,
        };
        assert_eq!(err.item_id(), Some("apples"));
        assert!(PipelineError::from(SchemaError::EmptyTable).item_id().is_none());
    }
}
