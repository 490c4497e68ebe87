//! Stage metrics for the ingestion pipeline
//!
//! Counters go through the `metrics` facade. Without an installed recorder they
//! are no-ops, which is what library callers and tests get. The binary installs a
//! Prometheus recorder and renders the exposition text at the end of a command so
//! the scheduler can collect it from a file.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::types::RejectReason;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the Prometheus recorder. Idempotent.
pub fn init_metrics() {
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            info!("Metrics recorder installed");
        }
        Err(e) => warn!("Failed to install metrics recorder: {}", e),
    }
}

/// Renders all metrics in Prometheus text format, if a recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

pub struct NormalizeMetrics;

impl NormalizeMetrics {
    pub fn record_rejected(reason: RejectReason) {
        ::metrics::counter!("reg_ingest_normalize_rejected_total", "reason" => reason.as_str())
            .increment(1);
    }
}

pub struct ValidationMetrics;

impl ValidationMetrics {
    pub fn record_outcome(accepted: usize, rejected: usize, repaired: usize) {
        ::metrics::counter!("reg_ingest_validation_accepted_total").increment(accepted as u64);
        ::metrics::counter!("reg_ingest_validation_rejected_total").increment(rejected as u64);
        ::metrics::counter!("reg_ingest_validation_repaired_total").increment(repaired as u64);
    }
}

pub struct PersistMetrics;

impl PersistMetrics {
    pub fn record_duplicates(existing: usize, in_batch: usize) {
        ::metrics::counter!("reg_ingest_duplicates_total", "scope" => "existing")
            .increment(existing as u64);
        ::metrics::counter!("reg_ingest_duplicates_total", "scope" => "batch")
            .increment(in_batch as u64);
    }

    pub fn record_inserted(count: usize) {
        ::metrics::counter!("reg_ingest_inserted_total").increment(count as u64);
    }

    pub fn record_store_contention() {
        ::metrics::counter!("reg_ingest_store_contention_total").increment(1);
    }

    pub fn record_association_error() {
        ::metrics::counter!("reg_ingest_association_errors_total").increment(1);
    }
}
