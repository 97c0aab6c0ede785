//! Per-record enrichment: transitive dependencies, advisories and score.
//!
//! Every external call runs under the configured timeout and the shared
//! cancellation token. Failures are absorbed into
//! [`EnrichedDependency::unavailable`] unless fail-fast is requested, in
//! which case transitive and advisory failures are returned to the caller.
//! Score failures and cancellations are always absorbed.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::diff::advisories::merge_advisories;
use crate::model::{
    normalize_ecosystem, ChangeType, DependencyKey, DependencyRecord, EnrichedDependency, Lookup,
    VulnerabilityAdvisory,
};
use crate::traits::{FetchError, GraphSource, ScorecardEngine};

/// Errors surfaced for a single record.
#[derive(Error, Debug)]
pub enum EnrichError {
    /// A collaborator returned an error
    #[error("{call} failed: {source}")]
    Fetch {
        call: &'static str,
        #[source]
        source: FetchError,
    },

    /// A collaborator did not answer in time
    #[error("{call} timed out after {timeout_secs}s")]
    Timeout {
        call: &'static str,
        timeout_secs: u64,
    },

    /// The run was cancelled before the call completed
    #[error("enrichment cancelled")]
    Cancelled,
}

/// Enrichment behaviour knobs.
#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Timeout applied to each external call (default: 10 seconds)
    pub call_timeout: Duration,

    /// Return transitive/advisory failures instead of marking them unavailable
    pub fail_fast: bool,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(10),
            fail_fast: false,
        }
    }
}

/// Attaches transitive dependencies, advisories and a risk score to records.
///
/// Cheap to clone; clones share the collaborators and cancellation token.
#[derive(Clone)]
pub struct Enricher {
    graph: Arc<dyn GraphSource>,
    scorecard: Arc<dyn ScorecardEngine>,
    options: EnrichOptions,
    cancel: CancellationToken,
}

impl Enricher {
    pub fn new(graph: Arc<dyn GraphSource>, scorecard: Arc<dyn ScorecardEngine>) -> Self {
        Self {
            graph,
            scorecard,
            options: EnrichOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: EnrichOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enriches one reconciled record.
    ///
    /// Removed records are returned bare: no lookups, no score, no advisories.
    ///
    /// # Errors
    ///
    /// Only in fail-fast mode, when a transitive or advisory lookup fails or
    /// times out.
    pub async fn enrich(
        &self,
        record: DependencyRecord,
        change_type: ChangeType,
    ) -> Result<EnrichedDependency, EnrichError> {
        let key = record.key();
        let mut enriched = EnrichedDependency::new(record, change_type);
        if change_type == ChangeType::Removed {
            debug!(dependency = %key, "removed dependency, skipping lookups");
            return Ok(enriched);
        }

        let ecosystem = enriched.record.ecosystem.clone();
        let name = enriched.record.name.clone();
        let inline = std::mem::take(&mut enriched.record.advisories);

        match enriched.record.version.clone() {
            Some(version) => {
                enriched.transitive = self
                    .transitive(
                        &enriched.record,
                        enriched.change_type,
                        &key,
                        &version,
                        &mut enriched.unavailable,
                    )
                    .await?;

                let mut pool = self.supplement(&inline, &key).await;
                pool.extend(inline.iter().cloned());
                match self
                    .guarded(
                        "fetch_advisories",
                        self.graph.fetch_advisories(&ecosystem, &name, &version),
                    )
                    .await
                {
                    Ok(fetched) => pool.extend(fetched),
                    Err(err) => {
                        self.absorb(err, Lookup::Advisories, &mut enriched.unavailable, &key)?
                    }
                }
                enriched.advisories = merge_advisories(pool);

                for dep in &mut enriched.transitive {
                    self.transitive_advisories(dep).await?;
                }
            }
            None => {
                warn!(dependency = %key, "no version reported, graph lookups skipped");
                enriched.advisories = merge_advisories(inline.iter().cloned());
                enriched.unavailable.insert(Lookup::Transitive);
                enriched.unavailable.insert(Lookup::Advisories);
            }
        }
        enriched.record.advisories = inline;

        self.score(&mut enriched, &key).await;
        Ok(enriched)
    }

    async fn transitive(
        &self,
        parent: &DependencyRecord,
        change_type: ChangeType,
        key: &DependencyKey,
        version: &str,
        unavailable: &mut BTreeSet<Lookup>,
    ) -> Result<Vec<EnrichedDependency>, EnrichError> {
        let fetched = self
            .guarded(
                "fetch_transitive_dependencies",
                self.graph
                    .fetch_transitive_dependencies(&parent.ecosystem, &parent.name, version),
            )
            .await;
        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                self.absorb(err, Lookup::Transitive, unavailable, key)?;
                return Ok(Vec::new());
            }
        };

        // Children share the parent's classification.
        Ok(records
            .into_iter()
            .map(|mut record| {
                record.ecosystem = normalize_ecosystem(&record.ecosystem);
                record.change_type = parent.change_type;
                record.is_direct = false;
                EnrichedDependency::new(record, change_type)
            })
            .collect())
    }

    async fn transitive_advisories(&self, dep: &mut EnrichedDependency) -> Result<(), EnrichError> {
        let key = dep.key();
        let Some(version) = dep.record.version.clone() else {
            dep.unavailable.insert(Lookup::Advisories);
            return Ok(());
        };
        match self
            .guarded(
                "fetch_advisories",
                self.graph
                    .fetch_advisories(&dep.record.ecosystem, &dep.record.name, &version),
            )
            .await
        {
            Ok(fetched) => dep.advisories = merge_advisories(fetched),
            Err(err) => self.absorb(err, Lookup::Advisories, &mut dep.unavailable, &key)?,
        }
        Ok(())
    }

    /// Fetches full copies of sparse inline advisories. Failures keep the sparse copy.
    async fn supplement(
        &self,
        inline: &[VulnerabilityAdvisory],
        key: &DependencyKey,
    ) -> Vec<VulnerabilityAdvisory> {
        let mut supplements = Vec::new();
        for advisory in inline.iter().filter(|a| a.is_sparse()) {
            match self
                .guarded(
                    "fetch_advisory_by_id",
                    self.graph.fetch_advisory_by_id(&advisory.advisory_id),
                )
                .await
            {
                Ok(full) if full.advisory_id == advisory.advisory_id => supplements.push(full),
                Ok(other) => warn!(
                    dependency = %key,
                    requested = %advisory.advisory_id,
                    returned = %other.advisory_id,
                    "advisory lookup returned a different id, ignored"
                ),
                Err(EnrichError::Cancelled) => break,
                Err(err) => debug!(
                    dependency = %key,
                    advisory = %advisory.advisory_id,
                    error = %err,
                    "advisory supplement unavailable"
                ),
            }
        }
        supplements
    }

    async fn score(&self, enriched: &mut EnrichedDependency, key: &DependencyKey) {
        let Some(url) = enriched.record.source_repository().map(str::to_string) else {
            debug!(dependency = %key, "no source repository, score skipped");
            return;
        };
        match self
            .guarded("fetch_risk_score", self.scorecard.fetch_risk_score(&url))
            .await
        {
            Ok(result) => enriched.scorecard = Some(result),
            Err(err) => {
                warn!(dependency = %key, repository = %url, error = %err, "score unavailable");
                enriched.unavailable.insert(Lookup::Score);
            }
        }
    }

    /// Runs one collaborator call under the timeout and cancellation token.
    async fn guarded<T, F>(&self, call: &'static str, fut: F) -> Result<T, EnrichError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        if self.cancel.is_cancelled() {
            return Err(EnrichError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EnrichError::Cancelled),
            outcome = timeout(self.options.call_timeout, fut) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(EnrichError::Fetch { call, source }),
                Err(_) => Err(EnrichError::Timeout {
                    call,
                    timeout_secs: self.options.call_timeout.as_secs(),
                }),
            },
        }
    }

    fn absorb(
        &self,
        err: EnrichError,
        lookup: Lookup,
        unavailable: &mut BTreeSet<Lookup>,
        key: &DependencyKey,
    ) -> Result<(), EnrichError> {
        if self.options.fail_fast && !matches!(err, EnrichError::Cancelled) {
            return Err(err);
        }
        warn!(dependency = %key, lookup = %lookup, error = %err, "lookup unavailable");
        unavailable.insert(lookup);
        Ok(())
    }
}
