pub mod clients;
pub mod diff;
pub mod executor;
pub mod model;
pub mod traits;

// Re-export common types for convenience
pub use diff::{DiffPipeline, DiffReport, OutputFormat, PipelineError, PipelineStats};
pub use executor::*;
pub use model::*;
pub use traits::*;
