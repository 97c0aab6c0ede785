use crate::model::{DependencyRecord, ScorecardResult, VulnerabilityAdvisory};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Reports the direct dependency changes between two commits.
#[async_trait]
pub trait DiffSource: Send + Sync {
    /// Returns raw `Added`/`Removed` records; never an update.
    async fn fetch_diff(&self, base: &str, head: &str) -> Result<Vec<DependencyRecord>, FetchError>;
}

/// Dependency graph and advisory lookups.
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Direct dependencies of one package version (one level only).
    async fn fetch_transitive_dependencies(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<DependencyRecord>, FetchError>;

    async fn fetch_advisories(
        &self,
        ecosystem: &str,
        name: &str,
        version: &str,
    ) -> Result<Vec<VulnerabilityAdvisory>, FetchError>;

    async fn fetch_advisory_by_id(&self, advisory_id: &str)
        -> Result<VulnerabilityAdvisory, FetchError>;
}

/// Aggregate trust score of a source repository.
#[async_trait]
pub trait ScorecardEngine: Send + Sync {
    async fn fetch_risk_score(&self, repository_url: &str) -> Result<ScorecardResult, FetchError>;
}
