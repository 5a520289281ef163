use async_trait::async_trait;
use billing_mirror_store::SubscriptionStore;
use billing_mirror_telemetry::{MetricsCollector, TenantResult};
use billing_mirror_types::{ExecutionCounts, ReconciliationStatus, SubscriptionRecord, TenantId};
use futures::{FutureExt, TryStreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::{
    CandidateSelector, ChunkWriter, ReconcileError, ReconcileOutcome, ReconciliationEngine,
    RunContext,
};

// ═══════════════════════════════════════════════════════════════════════════
// TENANT REGISTRY
// ═══════════════════════════════════════════════════════════════════════════

/// Source of the tenants a multi-tenant run visits
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    async fn tenant_ids(&self) -> Result<Vec<TenantId>, ReconcileError>;
}

/// Fixed tenant list, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTenantRegistry {
    tenants: Vec<TenantId>,
}

impl StaticTenantRegistry {
    pub fn new(tenants: Vec<TenantId>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantRegistry for StaticTenantRegistry {
    async fn tenant_ids(&self) -> Result<Vec<TenantId>, ReconcileError> {
        Ok(self.tenants.clone())
    }
}

/// Every tenant owning at least one mirrored subscription
#[derive(Clone)]
pub struct StoreTenantRegistry {
    store: Arc<dyn SubscriptionStore>,
}

impl StoreTenantRegistry {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TenantRegistry for StoreTenantRegistry {
    async fn tenant_ids(&self) -> Result<Vec<TenantId>, ReconcileError> {
        self.store
            .list_tenants()
            .await
            .map_err(|e| ReconcileError::Registry(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration for the orchestrator
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Pause between consecutive tenants
    pub inter_tenant_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inter_tenant_delay: Duration::from_millis(1000),
        }
    }
}

/// A tenant whose pipeline run failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantFailure {
    pub tenant_id: TenantId,
    pub error: String,
}

/// A pipeline run that stopped early, with the counts it reached first
#[derive(Debug)]
pub struct PipelineFailure {
    pub counts: ExecutionCounts,
    pub error: ReconcileError,
}

/// Aggregate result of a multi-tenant run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tenants_succeeded: Vec<TenantId>,
    pub tenant_failures: Vec<TenantFailure>,
    /// Record-level totals across every tenant, failed tenants' partial work included
    pub records: ExecutionCounts,
}

impl RunSummary {
    /// Counts in tenant units: processed / succeeded / failed tenants
    pub fn tenant_counts(&self) -> ExecutionCounts {
        let succeeded = self.tenants_succeeded.len() as u64;
        let failed = self.tenant_failures.len() as u64;
        ExecutionCounts::new(succeeded + failed, succeeded, failed)
    }

    /// Audit note naming failed tenants and records written with status ERROR, if any
    pub fn audit_message(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.tenant_failures.is_empty() {
            let details: Vec<String> = self
                .tenant_failures
                .iter()
                .map(|f| format!("{}: {}", f.tenant_id, f.error))
                .collect();
            parts.push(format!(
                "{} tenant(s) failed: {}",
                self.tenant_failures.len(),
                details.join("; ")
            ));
        }
        if self.records.failed > 0 {
            parts.push(format!(
                "{} of {} record(s) ended in ERROR",
                self.records.failed, self.records.processed
            ));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}

/// Runs the select → evaluate → write pipeline, one tenant at a time
pub struct TenantOrchestrator {
    selector: CandidateSelector,
    engine: ReconciliationEngine,
    writer: ChunkWriter,
    registry: Arc<dyn TenantRegistry>,
    config: OrchestratorConfig,
    metrics: MetricsCollector,
}

impl TenantOrchestrator {
    pub fn new(
        selector: CandidateSelector,
        engine: ReconciliationEngine,
        writer: ChunkWriter,
        registry: Arc<dyn TenantRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            selector,
            engine,
            writer,
            registry,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the pipeline for `ctx.tenant_id` (all tenants' records at once when unset).
    ///
    /// Counts are in record units: every evaluated candidate is processed,
    /// written records are successes unless they carry status ERROR. An error
    /// or panic stops the run; the failure keeps the counts of chunks already
    /// committed.
    pub async fn run_pipeline(
        &self,
        ctx: &RunContext,
        external_id: Option<&str>,
    ) -> Result<ExecutionCounts, PipelineFailure> {
        let mut counts = ExecutionCounts::default();
        let attempt = AssertUnwindSafe(self.drive(ctx, external_id, &mut counts))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(ReconcileError::from_panic(payload)));

        match attempt {
            Ok(()) => Ok(counts),
            Err(error) => Err(PipelineFailure { counts, error }),
        }
    }

    async fn drive(
        &self,
        ctx: &RunContext,
        external_id: Option<&str>,
        counts: &mut ExecutionCounts,
    ) -> Result<(), ReconcileError> {
        let chunk_size = ctx.limits.chunk_size.max(1);
        let mut candidates = self.selector.select(ctx, external_id);
        let mut chunk: Vec<SubscriptionRecord> = Vec::with_capacity(chunk_size);

        while let Some(candidate) = candidates.try_next().await? {
            counts.processed += 1;
            if let ReconcileOutcome::Write(record) = self.engine.process(&candidate, ctx).await {
                chunk.push(record);
            }
            if chunk.len() >= chunk_size {
                *counts += self.flush(&mut chunk).await?;
            }
        }
        *counts += self.flush(&mut chunk).await?;

        Ok(())
    }

    async fn flush(
        &self,
        chunk: &mut Vec<SubscriptionRecord>,
    ) -> Result<ExecutionCounts, ReconcileError> {
        let failed = chunk
            .iter()
            .filter(|r| r.reconciliation_status == ReconciliationStatus::Error)
            .count() as u64;
        let written = self.writer.write_chunk(chunk).await? as u64;
        chunk.clear();
        Ok(ExecutionCounts::new(0, written - failed, failed))
    }

    /// Visit every registered tenant sequentially.
    ///
    /// A tenant failure (error or panic) is logged and counted; the remaining
    /// tenants still run. Only a registry failure fails the whole run.
    pub async fn run_all(&self, ctx: &RunContext) -> Result<RunSummary, ReconcileError> {
        let tenants = self.registry.tenant_ids().await?;
        info!(tenants = tenants.len(), "starting multi-tenant reconciliation");

        let mut summary = RunSummary::default();
        for (index, tenant_id) in tenants.iter().enumerate() {
            if index > 0 && !self.config.inter_tenant_delay.is_zero() {
                tokio::time::sleep(self.config.inter_tenant_delay).await;
            }

            let tenant_ctx = ctx.for_tenant(tenant_id.clone());
            match self.run_pipeline(&tenant_ctx, None).await {
                Ok(counts) => {
                    info!(
                        tenant_id = %tenant_id,
                        processed = counts.processed,
                        success = counts.success,
                        failed = counts.failed,
                        "tenant reconciliation completed"
                    );
                    self.metrics.record_tenant_run(TenantResult::Succeeded);
                    summary.records += counts;
                    summary.tenants_succeeded.push(tenant_id.clone());
                }
                Err(failure) => {
                    error!(
                        tenant_id = %tenant_id,
                        error = %failure.error,
                        committed = failure.counts.success + failure.counts.failed,
                        "tenant reconciliation failed"
                    );
                    self.metrics.record_tenant_run(TenantResult::Failed);
                    summary.records += failure.counts;
                    summary.tenant_failures.push(TenantFailure {
                        tenant_id: tenant_id.clone(),
                        error: failure.error.to_string(),
                    });
                }
            }
        }

        if !summary.tenant_failures.is_empty() {
            warn!(
                failed = summary.tenant_failures.len(),
                succeeded = summary.tenants_succeeded.len(),
                "multi-tenant reconciliation finished with tenant failures"
            );
        }

        Ok(summary)
    }
}

impl std::fmt::Debug for TenantOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantOrchestrator")
            .field("selector", &self.selector)
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish()
    }
}
