use std::time::Duration;

use billing_mirror_types::ReconciliationStatus;
use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Outcome of one tenant's pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantResult {
    Succeeded,
    Failed,
}

impl TenantResult {
    fn as_label(&self) -> &'static str {
        match self {
            TenantResult::Succeeded => "succeeded",
            TenantResult::Failed => "failed",
        }
    }
}

/// Metrics collector for the subscription mirror
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECORD METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a reconciled record and the status it was written with
    pub fn record_outcome(&self, status: ReconciliationStatus) {
        let label = match status {
            ReconciliationStatus::Pending => "pending",
            ReconciliationStatus::Synced => "synced",
            ReconciliationStatus::Updated => "updated",
            ReconciliationStatus::Processed => "processed",
            ReconciliationStatus::Error => "error",
        };
        RECORD_OUTCOMES.with_label_values(&[label]).inc();
    }

    pub fn record_skip(&self, reason: &str) {
        RECORD_SKIPS.with_label_values(&[reason]).inc();
    }

    pub fn record_provider_fallback(&self, cause: &str) {
        PROVIDER_FALLBACKS.with_label_values(&[cause]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PERSISTENCE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_chunk_committed(&self) {
        CHUNKS_COMMITTED.inc();
    }

    pub fn record_identifier_resyncs(&self, count: u64) {
        IDENTIFIER_RESYNCS.inc_by(count);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RUN METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_tenant_run(&self, result: TenantResult) {
        TENANT_RUNS.with_label_values(&[result.as_label()]).inc();
    }

    pub fn record_run_started(&self) {
        ACTIVE_RUNS.inc();
    }

    pub fn record_run_finished(&self, duration: Duration) {
        ACTIVE_RUNS.dec();
        RUN_DURATION.observe(duration.as_millis() as f64);
    }

    /// Render every registered metric in the Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    EncodingError(String),
}
