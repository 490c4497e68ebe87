use chrono::{Local, NaiveDateTime, SubsecRound};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use super::ingestion::RawSource;
use super::processing::normalize::{Normalizer, NormalizerConfig};
use super::processing::validation::{RuleSet, ValidationEngine};
use super::storage::{PersistenceCoordinator, RegulationStore};
use crate::config::Settings;
use crate::error::PipelineError;
use crate::types::{Record, RejectReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// A stage produced nothing; later stages were not run.
    Skipped,
    Failed,
}

/// Counts reported at the end of every run or stage command, whatever path it took.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub entity: String,
    pub extracted: usize,
    pub normalization_rejected: usize,
    pub rejected_by_reason: BTreeMap<RejectReason, usize>,
    pub validated: usize,
    pub discarded: usize,
    pub repaired: usize,
    pub duplicates: usize,
    pub inserted: usize,
    pub associations: usize,
    pub status: RunStatus,
    pub message: String,
}

impl RunSummary {
    pub fn new(entity: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            entity: entity.to_string(),
            extracted: 0,
            normalization_rejected: 0,
            rejected_by_reason: BTreeMap::new(),
            validated: 0,
            discarded: 0,
            repaired: 0,
            duplicates: 0,
            inserted: 0,
            associations: 0,
            status: RunStatus::Completed,
            message: String::new(),
        }
    }

    fn skip(&mut self, message: &str) {
        warn!("{}", message);
        self.status = RunStatus::Skipped;
        self.message = message.to_string();
    }
}

/// Runs one stage command against `summary`. A fatal error marks the summary failed
/// and logs the stage, entity and counts gathered before it.
pub fn run_stage<F>(stage: &'static str, mut summary: RunSummary, body: F) -> RunSummary
where
    F: FnOnce(&mut RunSummary) -> Result<(), PipelineError>,
{
    match body(&mut summary) {
        Ok(()) => summary,
        Err(e) => *RunFailure::new(stage, summary, e).summary,
    }
}

/// A fatal error together with the counts gathered before it happened.
#[derive(Debug, Error)]
#[error("run failed during {stage}: {source}")]
pub struct RunFailure {
    pub stage: &'static str,
    pub summary: Box<RunSummary>,
    pub source: PipelineError,
}

impl RunFailure {
    pub fn new(stage: &'static str, mut summary: RunSummary, source: PipelineError) -> Self {
        summary.status = RunStatus::Failed;
        summary.message = source.to_string();
        error!(
            stage,
            entity = %summary.entity,
            extracted = summary.extracted,
            validated = summary.validated,
            inserted = summary.inserted,
            "Run aborted: {}",
            source
        );
        Self {
            stage,
            summary: Box::new(summary),
            source,
        }
    }
}

/// One pipeline run: normalization, validation and persistence, strictly in sequence.
pub struct Pipeline {
    entity: String,
    normalizer: Normalizer,
}

impl Pipeline {
    /// Builds a run stamped with the current local time.
    pub fn new(settings: &Settings) -> Self {
        Self::started_at(settings, Local::now().naive_local().trunc_subsecs(0))
    }

    pub fn started_at(settings: &Settings, started_at: NaiveDateTime) -> Self {
        Self {
            entity: settings.entity.clone(),
            normalizer: Normalizer::new(NormalizerConfig::from_settings(settings), started_at),
        }
    }

    /// Fetches raw rows and normalizes them. Returns an empty batch when nothing is usable.
    pub fn extract(
        &self,
        source: &mut dyn RawSource,
        summary: &mut RunSummary,
    ) -> Result<Vec<Record>, PipelineError> {
        let items = source.fetch()?;
        summary.extracted = items.len();
        info!(source = source.name(), extracted = items.len(), "Raw items extracted");
        if items.is_empty() {
            summary.skip("No data extracted.");
            return Ok(Vec::new());
        }

        let report = self.normalizer.normalize_batch(&items);
        summary.normalization_rejected = report.rejected_total();
        summary.rejected_by_reason = report.rejected;
        if report.records.is_empty() {
            summary.skip("No usable records after normalization.");
        }
        Ok(report.records)
    }

    pub fn validate(
        &self,
        rules: RuleSet,
        records: Vec<Record>,
        summary: &mut RunSummary,
    ) -> Vec<Record> {
        let report = ValidationEngine::new(rules).validate(records);
        summary.validated = report.accepted.len();
        summary.discarded = report.rejected;
        summary.repaired = report.repaired;
        if report.accepted.is_empty() {
            summary.skip("No valid data left after validation.");
        }
        report.accepted
    }

    pub fn write<S: RegulationStore>(
        &self,
        coordinator: &mut PersistenceCoordinator<S>,
        records: Vec<Record>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        if records.is_empty() {
            summary.skip("No data to write.");
            return Ok(());
        }
        let outcome = coordinator.write(&self.entity, records)?;
        summary.duplicates = outcome.duplicates;
        summary.inserted = outcome.inserted;
        summary.associations = outcome.associations;
        if outcome.new_records == 0 {
            summary.skip(&outcome.message);
        } else {
            summary.message = outcome.message;
        }
        Ok(())
    }

    /// Runs every stage. Empty stages, including a batch with nothing new to write,
    /// end the run as skipped; fatal errors carry the counts gathered so far.
    /// Committed writes are never undone.
    pub fn run<S: RegulationStore>(
        &self,
        source: &mut dyn RawSource,
        rules: RuleSet,
        coordinator: &mut PersistenceCoordinator<S>,
    ) -> Result<RunSummary, RunFailure> {
        let mut summary = RunSummary::new(&self.entity);
        let span = info_span!("run", run_id = %summary.run_id, entity = %self.entity);
        let _enter = span.enter();

        let records = match self.extract(source, &mut summary) {
            Ok(records) => records,
            Err(e) => return Err(RunFailure::new("extract", summary, e)),
        };
        if summary.status == RunStatus::Skipped {
            return Ok(summary);
        }

        let accepted = self.validate(rules, records, &mut summary);
        if summary.status == RunStatus::Skipped {
            return Ok(summary);
        }

        if let Err(e) = self.write(coordinator, accepted, &mut summary) {
            return Err(RunFailure::new("write", summary, e));
        }

        info!(
            extracted = summary.extracted,
            validated = summary.validated,
            discarded = summary.discarded,
            duplicates = summary.duplicates,
            inserted = summary.inserted,
            "Run finished"
        );
        Ok(summary)
    }
}
