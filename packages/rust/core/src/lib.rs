//! Pipeline orchestration for Stagecraft.
//!
//! This crate constructs the six agents (activity, stage report, analysis,
//! writer, editor, delivery) and runs them in order, turning ingestion
//! failures into a typed [`PipelineResult`] instead of an error.

pub mod pipeline;

pub use pipeline::{
    Pipeline, PipelineResult, PreviewResult, ProgressReporter, RunRequest, SilentProgress,
    analysis_summary,
};
