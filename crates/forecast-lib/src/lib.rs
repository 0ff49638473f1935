//! Demand forecast ensemble engine
//!
//! This crate provides the core functionality for:
//! - Normalizing arbitrary sales uploads into clean daily series
//! - Fitting several forecasting model families behind one adapter trait
//! - Blending them by inverse backtest error into one forecast with a band
//! - Evaluating forecasts and preparing explanation requests
//! - Metrics and structured logging of every run

pub mod adapters;
pub mod ensemble;
pub mod error;
pub mod evaluator;
pub mod explain;
pub mod models;
pub mod normalizer;
pub mod observability;
pub mod pipeline;

pub use adapters::{default_adapters, AdapterConfig, ModelAdapter, TrainedModel};
pub use ensemble::{EnsembleCombiner, EnsembleConfig};
pub use error::{
    AdapterError, AdapterFailure, EnsembleError, ExplanationError, PipelineError, SchemaError,
    ValidationError,
};
pub use evaluator::{evaluate, evaluate_against_baseline};
pub use explain::{explain_checked, ExplanationRequest, Explainer, TemplateExplainer};
pub use models::*;
pub use normalizer::{normalize, Normalizer, NormalizerConfig};
pub use observability::{EngineMetrics, StructuredLogger};
pub use pipeline::{ForecastPipeline, ItemForecast, PipelineConfig, PipelineOptions, PipelineOutput};
