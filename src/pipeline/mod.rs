// Record pipeline: ingestion, processing, and storage

pub mod ingestion;
pub mod processing;
pub mod run;
pub mod storage;

pub use run::{run_stage, Pipeline, RunFailure, RunStatus, RunSummary};
