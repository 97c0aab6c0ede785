use crate::diff::enrich::{EnrichError, Enricher};
use crate::diff::pipeline::PipelineError;
use crate::model::{ChangeType, DependencyRecord, EnrichedDependency};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

/// Runs enrichments concurrently, at most `concurrency_limit` at a time.
#[derive(Clone)]
pub struct EnrichmentExecutor {
    semaphore: Arc<Semaphore>,
    enricher: Enricher,
}

impl EnrichmentExecutor {
    pub fn new(enricher: Enricher, concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit.max(1))),
            enricher,
        }
    }

    #[instrument(skip(self, record), fields(dependency = %record.key()))]
    pub async fn execute(
        &self,
        record: DependencyRecord,
        change_type: ChangeType,
    ) -> Result<EnrichedDependency, EnrichError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EnrichError::Cancelled)?;

        debug!("Starting enrichment");
        let result = self.enricher.enrich(record, change_type).await;
        debug!(ok = result.is_ok(), "Finished enrichment");
        result
    }

    /// Enriches every job and returns the results in job order.
    ///
    /// The first per-record error aborts the remaining jobs.
    pub async fn execute_all(
        &self,
        jobs: Vec<(DependencyRecord, ChangeType)>,
    ) -> Result<Vec<EnrichedDependency>, PipelineError> {
        let total = jobs.len();
        let mut set = JoinSet::new();
        for (index, (record, change_type)) in jobs.into_iter().enumerate() {
            let executor = self.clone();
            let key = record.key();
            set.spawn(async move { (index, key, executor.execute(record, change_type).await) });
        }

        let mut slots: Vec<Option<EnrichedDependency>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            let (index, key, result) = joined.map_err(|e| PipelineError::Join(e.to_string()))?;
            match result {
                Ok(enriched) => slots[index] = Some(enriched),
                Err(source) => {
                    set.abort_all();
                    return Err(PipelineError::Enrichment {
                        dependency: key.to_string(),
                        source,
                    });
                }
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| PipelineError::Join("enrichment task lost".to_string())))
            .collect()
    }
}
