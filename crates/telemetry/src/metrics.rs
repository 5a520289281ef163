use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // RECORD METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reconciled records by resulting reconciliation status
    pub static ref RECORD_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "billing_mirror_record_outcomes_total",
        "Reconciled subscription records by resulting status",
        &["status"]
    )
    .unwrap();

    /// Candidates left untouched, by reason
    pub static ref RECORD_SKIPS: IntCounterVec = register_int_counter_vec!(
        "billing_mirror_record_skips_total",
        "Renewal candidates skipped without a write",
        &["reason"]
    )
    .unwrap();

    /// Provider lookups that fell back to local dates, by cause
    pub static ref PROVIDER_FALLBACKS: IntCounterVec = register_int_counter_vec!(
        "billing_mirror_provider_fallbacks_total",
        "Provider lookups that fell back to local-only evaluation",
        &["cause"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // PERSISTENCE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Chunks committed by the writer
    pub static ref CHUNKS_COMMITTED: IntCounter = register_int_counter!(
        "billing_mirror_chunks_committed_total",
        "Atomic chunks committed"
    )
    .unwrap();

    /// Identifier counter resynchronizations after a collision
    pub static ref IDENTIFIER_RESYNCS: IntCounter = register_int_counter!(
        "billing_mirror_identifier_resyncs_total",
        "Identifier counter resynchronizations"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // RUN METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Tenant pipeline runs by result
    pub static ref TENANT_RUNS: IntCounterVec = register_int_counter_vec!(
        "billing_mirror_tenant_runs_total",
        "Tenant pipeline runs by result",
        &["result"]
    )
    .unwrap();

    /// Executions currently running in this process
    pub static ref ACTIVE_RUNS: IntGauge = register_int_gauge!(
        "billing_mirror_runs_active",
        "Reconciliation executions currently running"
    )
    .unwrap();

    /// Execution duration histogram (in milliseconds)
    pub static ref RUN_DURATION: Histogram = register_histogram!(
        "billing_mirror_run_duration_ms",
        "Reconciliation execution duration in milliseconds",
        vec![100.0, 1000.0, 5000.0, 30000.0, 60000.0, 300000.0, 900000.0]
    )
    .unwrap();
}
