use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::{DeduplicationIndex, RegulationStore};
use crate::error::{PipelineError, Result};
use crate::metrics::PersistMetrics;
use crate::types::Record;

/// Result of one write attempt for an entity.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WriteOutcome {
    pub entity: String,
    /// Candidates belonging to the entity.
    pub processed: usize,
    /// Candidates tagged with another entity and ignored.
    pub foreign: usize,
    /// Regulations already persisted for the entity before this write.
    pub existing: usize,
    pub duplicates: usize,
    /// Candidates left after deduplication; zero means there was nothing to write.
    pub new_records: usize,
    pub inserted: usize,
    pub associations: usize,
    pub association_error: Option<String>,
    pub message: String,
}

/// Deduplicates candidates against the store and writes the new ones with their links.
pub struct PersistenceCoordinator<S: RegulationStore> {
    store: S,
    component_id: i64,
}

impl<S: RegulationStore> PersistenceCoordinator<S> {
    pub fn new(store: S, component_id: i64) -> Self {
        Self { store, component_id }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists the records of `entity` that are not already known.
    ///
    /// A uniqueness conflict raised by the store counts as nothing inserted. Failure
    /// to recover ids or to write association links is reported in the outcome and
    /// leaves the regulation rows committed. Any other store failure is returned as
    /// an error.
    #[instrument(skip(self, records), fields(stage = "write", candidates = records.len()))]
    pub fn write(&mut self, entity: &str, records: Vec<Record>) -> Result<WriteOutcome> {
        let mut outcome = WriteOutcome {
            entity: entity.to_string(),
            ..WriteOutcome::default()
        };

        let total = records.len();
        let candidates: Vec<Record> =
            records.into_iter().filter(|r| r.entity == entity).collect();
        outcome.foreign = total - candidates.len();
        outcome.processed = candidates.len();
        if outcome.foreign > 0 {
            warn!(foreign = outcome.foreign, "Ignoring records tagged with another entity");
        }
        if candidates.is_empty() {
            outcome.message = format!("No records found for entity {}", entity);
            return Ok(outcome);
        }

        let index = DeduplicationIndex::new(self.store.existing_identities(entity)?);
        outcome.existing = index.len();
        if index.is_empty() {
            info!("No existing records, only in-batch duplicates apply");
        }

        let partition = index.partition(candidates);
        outcome.duplicates = partition.duplicates();
        outcome.new_records = partition.new.len();
        PersistMetrics::record_duplicates(
            partition.existing_duplicates,
            partition.batch_duplicates,
        );
        info!(
            existing = outcome.existing,
            already_persisted = partition.existing_duplicates,
            repeated_in_batch = partition.batch_duplicates,
            new = partition.new.len(),
            "Duplicate check complete"
        );

        if partition.new.is_empty() {
            outcome.message = format!(
                "No new records found for entity {} after duplicate validation",
                entity
            );
            return Ok(outcome);
        }

        let ids = match self.store.insert_regulations(entity, &partition.new) {
            Ok(ids) => ids,
            Err(e) if e.is_unique_violation() => {
                warn!("Store rejected duplicates; another run may have written them: {}", e);
                PersistMetrics::record_store_contention();
                outcome.duplicates += partition.new.len();
                outcome.message = format!(
                    "Some records for entity {} were duplicates and skipped",
                    entity
                );
                return Ok(outcome);
            }
            Err(PipelineError::IdRecovery { inserted, source }) => {
                error!(
                    entity,
                    inserted,
                    "Regulations committed but their ids could not be recovered: {}",
                    source
                );
                outcome.inserted = inserted;
                PersistMetrics::record_inserted(inserted);
                PersistMetrics::record_association_error();
                let msg = format!("Error recovering regulation IDs: {}", source);
                outcome.association_error = Some(msg.clone());
                outcome.message = summary_message(&outcome, &msg);
                return Ok(outcome);
            }
            Err(e) => {
                error!(
                    entity,
                    processed = outcome.processed,
                    new = partition.new.len(),
                    "Insert failed and was rolled back: {}",
                    e
                );
                return Err(e);
            }
        };

        outcome.inserted = partition.new.len();
        PersistMetrics::record_inserted(outcome.inserted);
        if ids.len() != outcome.inserted {
            warn!(
                inserted = outcome.inserted,
                recovered = ids.len(),
                "Recovered id count differs from inserted rows"
            );
        }

        let link_message = if ids.is_empty() {
            "No new regulation IDs provided".to_string()
        } else {
            match self.store.insert_association_links(&ids, self.component_id) {
                Ok(written) => {
                    outcome.associations = written;
                    format!("Successfully inserted {} regulation components", written)
                }
                Err(e) => {
                    error!("Association links failed; regulations stay committed: {}", e);
                    PersistMetrics::record_association_error();
                    let msg = format!("Error inserting regulation components: {}", e);
                    outcome.association_error = Some(msg.clone());
                    msg
                }
            }
        };

        outcome.message = summary_message(&outcome, &link_message);
        info!(message = %outcome.message, "Write complete");
        Ok(outcome)
    }

}

fn summary_message(outcome: &WriteOutcome, link_message: &str) -> String {
    format!(
        "Entity {}: Processed: {} | Existing: {} | \
         Duplicates skipped: {} | New inserted: {}. {}",
        outcome.entity,
        outcome.processed,
        outcome.existing,
        outcome.duplicates,
        outcome.inserted,
        link_message
    )
}
