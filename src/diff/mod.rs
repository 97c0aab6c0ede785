//! Diff module - dependency change reconciliation and risk reporting.
//!
//! This module provides the stages of the dependency diff pipeline:
//! - **Reconcile**: pairing raw added/removed records via [`reconcile::reconcile`]
//! - **Enrich**: transitive dependencies, advisories and scores via [`enrich::Enricher`]
//! - **Rank**: risk-score ordering via [`rank::rank`]
//! - **Render**: Markdown and JSON reports via [`formats`]
//! - **Pipeline**: async coordinator via [`pipeline::DiffPipeline`]

pub mod advisories;
pub mod enrich;
pub mod formats;
pub mod pipeline;
pub mod rank;
pub mod reconcile;

// Re-export commonly used types
pub use advisories::{merge_advisories, merge_advisory};
pub use enrich::{EnrichError, EnrichOptions, Enricher};
pub use formats::OutputFormat;
pub use pipeline::{DiffPipeline, DiffReport, PipelineError, PipelineStats};
pub use rank::rank;
pub use reconcile::{reconcile, ReconciliationResult, UpdatedDependency};
