//! Dependency diff pipeline executor.
//!
//! This module provides the [`DiffPipeline`] coordinator that executes the
//! diff stages (Fetch → Reconcile → Enrich → Rank) with:
//! - Async execution via `tokio`
//! - A configurable timeout per external call
//! - Bounded fan-out of per-record enrichment
//! - Cooperative cancellation via [`CancellationToken`]
//! - Structured logging via `tracing`

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::diff::enrich::{EnrichError, EnrichOptions, Enricher};
use crate::diff::formats::{json, markdown, OutputFormat};
use crate::diff::rank::rank;
use crate::diff::reconcile::{reconcile, ReconciliationResult};
use crate::executor::EnrichmentExecutor;
use crate::model::{normalize_ecosystem, ChangeType, DependencyRecord, EnrichedDependency};
use crate::traits::{DiffSource, FetchError, GraphSource, ScorecardEngine};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Ranked, enriched dependency diff.
#[derive(Debug, Clone)]
pub struct DiffReport {
    /// Bucketed raw records, kept for the old side of updates
    pub reconciliation: ReconciliationResult,

    /// Newly introduced dependencies, ranked
    pub added: Vec<EnrichedDependency>,

    /// Version-bumped dependencies (new side), ranked
    pub updated: Vec<EnrichedDependency>,

    /// Removed dependencies, ranked
    pub removed: Vec<EnrichedDependency>,

    /// Timing and lookup statistics
    pub stats: PipelineStats,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn to_markdown(&self) -> String {
        markdown::render(&self.reconciliation, &self.added, &self.updated, &self.removed)
    }

    /// # Errors
    ///
    /// Returns the JSON serializer error.
    pub fn to_json(&self) -> serde_json::Result<String> {
        json::render(&self.reconciliation, &self.added, &self.updated, &self.removed)
    }

    /// # Errors
    ///
    /// Returns the JSON serializer error for [`OutputFormat::Json`].
    pub fn render(&self, format: OutputFormat) -> serde_json::Result<String> {
        match format {
            OutputFormat::Markdown => Ok(self.to_markdown()),
            OutputFormat::Json => self.to_json(),
        }
    }
}

/// Statistics about one pipeline run.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    /// Total time spent on the run (milliseconds)
    pub total_duration_ms: u64,

    /// Time spent waiting on the diff source (milliseconds)
    pub diff_duration_ms: u64,

    /// Time spent on enrichment (milliseconds)
    pub enrichment_duration_ms: u64,

    /// Raw records returned by the diff source
    pub records_fetched: usize,

    /// Dependencies that went through enrichment
    pub dependencies_enriched: usize,

    /// Dependencies with at least one unavailable lookup
    pub incomplete_dependencies: usize,

    /// Dependencies with at least one advisory
    pub vulnerable_dependencies: usize,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that abort a pipeline run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    /// The diff source could not be reached or its response parsed
    #[error("Diff source request failed: {0}")]
    DiffSource(#[source] FetchError),

    /// The diff source exceeded the call timeout
    #[error("Diff source timed out after {timeout_secs}s")]
    DiffSourceTimeout { timeout_secs: u64 },

    /// Cancelled before the diff was fetched
    #[error("Pipeline cancelled before the diff was fetched")]
    Cancelled,

    /// A per-record lookup failed in fail-fast mode
    #[error("Enrichment of '{dependency}' failed: {source}")]
    Enrichment {
        dependency: String,
        #[source]
        source: EnrichError,
    },

    /// An enrichment task panicked or was aborted
    #[error("Enrichment task failed: {0}")]
    Join(String),
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// Dependency diff pipeline.
///
/// The pipeline coordinates:
/// 1. **Fetch**: raw added/removed records from the [`DiffSource`]
/// 2. **Reconcile**: pair them into added, updated and removed buckets
/// 3. **Enrich**: transitive dependencies, advisories and scores, concurrently
/// 4. **Rank**: order each bucket by risk score
///
/// Only a diff source failure is fatal. Enrichment failures are recorded on
/// the affected dependency unless fail-fast is enabled.
///
/// # Example
///
/// ```ignore
/// let pipeline = DiffPipeline::new(diff_source, graph, scorecard)
///     .with_call_timeout(Duration::from_secs(5))
///     .with_concurrency(4);
///
/// let report = pipeline.run("abc123", "def456", CancellationToken::new()).await?;
/// println!("{}", report.to_markdown());
/// ```
pub struct DiffPipeline {
    /// Source of raw dependency changes
    diff_source: Arc<dyn DiffSource>,

    /// Transitive dependency and advisory lookups
    graph: Arc<dyn GraphSource>,

    /// Repository scoring
    scorecard: Arc<dyn ScorecardEngine>,

    /// Timeout for each external call (default: 10 seconds)
    call_timeout: Duration,

    /// Maximum concurrent enrichments (default: 8)
    concurrency: usize,

    /// Abort on the first transitive/advisory lookup failure
    fail_fast: bool,
}

impl DiffPipeline {
    /// Creates a new pipeline over the given collaborators.
    ///
    /// Default configuration:
    /// - Timeout: 10 seconds per external call
    /// - Concurrency: 8 enrichments in flight
    /// - Fail-fast: disabled
    pub fn new(
        diff_source: Arc<dyn DiffSource>,
        graph: Arc<dyn GraphSource>,
        scorecard: Arc<dyn ScorecardEngine>,
    ) -> Self {
        Self {
            diff_source,
            graph,
            scorecard,
            call_timeout: Duration::from_secs(10),
            concurrency: 8,
            fail_fast: false,
        }
    }

    /// Sets the timeout applied to every external call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the maximum number of records enriched at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Makes transitive and advisory lookup failures abort the run.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Fetches the diff between `base` and `head` and builds the report.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if:
    /// - The diff source fails or times out
    /// - `cancel` fires before the diff arrives
    /// - A lookup fails while fail-fast is enabled
    #[instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        base: &str,
        head: &str,
        cancel: CancellationToken,
    ) -> Result<DiffReport, PipelineError> {
        let start = Instant::now();

        info!("Fetching dependency diff");
        let records = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            fetched = timeout(self.call_timeout, self.diff_source.fetch_diff(base, head)) => fetched
                .map_err(|_| PipelineError::DiffSourceTimeout {
                    timeout_secs: self.call_timeout.as_secs(),
                })?
                .map_err(PipelineError::DiffSource)?,
        };
        let diff_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            records = records.len(),
            duration_ms = diff_duration_ms,
            "Diff fetched"
        );

        let mut report = self.build_report(records, cancel).await?;
        report.stats.diff_duration_ms = diff_duration_ms;
        report.stats.total_duration_ms = start.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Reconciles, enriches and ranks already-fetched diff records.
    ///
    /// Cancellation here never fails the run: records still in flight finish
    /// with their remaining lookups marked unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Enrichment`] only when fail-fast is enabled.
    pub async fn build_report(
        &self,
        records: Vec<DependencyRecord>,
        cancel: CancellationToken,
    ) -> Result<DiffReport, PipelineError> {
        let start = Instant::now();
        let mut stats = PipelineStats {
            records_fetched: records.len(),
            ..PipelineStats::default()
        };

        let records = records.into_iter().map(|mut record| {
            record.ecosystem = normalize_ecosystem(&record.ecosystem);
            record.is_direct = true;
            record
        });
        let reconciliation = reconcile(records);

        let added_count = reconciliation.added.len();
        let updated_count = reconciliation.updated.len();
        let jobs: Vec<(DependencyRecord, ChangeType)> = reconciliation
            .added
            .values()
            .map(|r| (r.clone(), ChangeType::Added))
            .chain(
                reconciliation
                    .updated
                    .values()
                    .map(|u| (u.current.clone(), ChangeType::Updated)),
            )
            .chain(
                reconciliation
                    .removed
                    .values()
                    .map(|r| (r.clone(), ChangeType::Removed)),
            )
            .collect();

        info!(
            added = added_count,
            updated = updated_count,
            removed = reconciliation.removed.len(),
            "Starting enrichment"
        );
        let enricher = Enricher::new(self.graph.clone(), self.scorecard.clone())
            .with_options(EnrichOptions {
                call_timeout: self.call_timeout,
                fail_fast: self.fail_fast,
            })
            .with_cancellation(cancel);
        let mut enriched = EnrichmentExecutor::new(enricher, self.concurrency)
            .execute_all(jobs)
            .await?;

        stats.dependencies_enriched = enriched.len();
        stats.incomplete_dependencies = enriched
            .iter()
            .filter(|d| !d.unavailable.is_empty())
            .count();
        stats.vulnerable_dependencies = enriched.iter().filter(|d| d.is_vulnerable()).count();
        stats.enrichment_duration_ms = start.elapsed().as_millis() as u64;

        let removed = enriched.split_off(added_count + updated_count);
        let updated = enriched.split_off(added_count);
        let added = enriched;

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            duration_ms = stats.enrichment_duration_ms,
            enriched = stats.dependencies_enriched,
            incomplete = stats.incomplete_dependencies,
            vulnerable = stats.vulnerable_dependencies,
            "Enrichment completed"
        );

        Ok(DiffReport {
            reconciliation,
            added: rank(added),
            updated: rank(updated),
            removed: rank(removed),
            stats,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
