use billing_mirror_provider::ProviderGateway;
use billing_mirror_store::{ExecutionStore, IdAllocator, IdCounter, SubscriptionStore};
use billing_mirror_telemetry::RunSpan;
use billing_mirror_types::{
    ExecutionCounts, ExecutionRecord, NewExecution, RunRequest, RunResponse, TriggerSource,
    RENEWAL_RECONCILIATION_JOB,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn, Instrument};

use crate::{
    CandidateSelector, ChunkWriter, ExecutionTracker, OrchestratorConfig, ReconcileError,
    ReconciliationEngine, ReconciliationPolicy, RunContext, RunLimits, StoreTenantRegistry,
    TenantOrchestrator, TenantRegistry, DEFAULT_STALE_AFTER_SECS,
};

/// Largest chunk a caller may request
pub const MAX_BATCH_SIZE: usize = 1000;

/// Outcome of the pipeline part of a run, before it is audited
struct RunOutcome {
    counts: ExecutionCounts,
    result: Result<Option<String>, String>,
}

/// The renewal reconciliation job: validates triggers, audits and runs the pipeline
pub struct RenewalReconciliationJob {
    job_name: String,
    tracker: ExecutionTracker,
    orchestrator: TenantOrchestrator,
    default_limits: RunLimits,
}

impl RenewalReconciliationJob {
    pub fn builder() -> RenewalReconciliationJobBuilder {
        RenewalReconciliationJobBuilder::new()
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn orchestrator(&self) -> &TenantOrchestrator {
        &self.orchestrator
    }

    /// Handle one trigger.
    ///
    /// `success` is false only when the request is invalid or the run could
    /// not be started; tenant and record failures land in the execution record.
    pub async fn trigger(&self, request: RunRequest, source: TriggerSource) -> RunResponse {
        let limits = match self.validate(&request) {
            Ok(limits) => limits,
            Err(err) => {
                warn!(error = %err, "rejecting reconciliation trigger");
                return RunResponse::rejected(err.to_string());
            }
        };

        let now = Utc::now();
        let new = NewExecution {
            job_name: self.job_name.clone(),
            tenant_id: request.tenant_id.clone(),
            trigger_source: source,
            parameters: serde_json::to_string(&request).ok(),
            started_at: now,
        };

        let execution = match self.tracker.start(new).await {
            Ok(execution) => execution,
            Err(err) => {
                error!(error = %err, "failed to start reconciliation run");
                return RunResponse::rejected(format!("Failed to start run: {err}"));
            }
        };

        let span = RunSpan::new(self.job_name.clone(), request.tenant_id.clone());
        let ctx = RunContext::new(now).with_limits(limits);
        let outcome = self
            .execute(&ctx, &request)
            .instrument(span.span())
            .await;

        self.finish(execution, outcome).await
    }

    /// Look up an audit entry
    pub async fn execution(&self, id: i64) -> Result<Option<ExecutionRecord>, ReconcileError> {
        self.tracker.get(id).await
    }

    /// Latest audit entries of this job, newest first
    pub async fn recent_executions(
        &self,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ReconcileError> {
        self.tracker.recent(&self.job_name, limit).await
    }

    fn validate(&self, request: &RunRequest) -> Result<RunLimits, ReconcileError> {
        if request
            .tenant_id
            .as_deref()
            .is_some_and(|t| t.trim().is_empty())
        {
            return Err(ReconcileError::InvalidRequest(
                "tenantId must not be blank".to_string(),
            ));
        }
        if request
            .external_subscription_id
            .as_deref()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err(ReconcileError::InvalidRequest(
                "externalSubscriptionId must not be blank".to_string(),
            ));
        }

        let chunk_size = request.batch_size.unwrap_or(self.default_limits.chunk_size);
        if chunk_size == 0 || chunk_size > MAX_BATCH_SIZE {
            return Err(ReconcileError::InvalidRequest(format!(
                "batchSize must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }

        let max_records = request.max_records.unwrap_or(self.default_limits.max_records);
        if max_records == 0 {
            return Err(ReconcileError::InvalidRequest(
                "maxRecords must be positive".to_string(),
            ));
        }

        Ok(RunLimits {
            chunk_size,
            max_records,
        })
    }

    async fn execute(&self, ctx: &RunContext, request: &RunRequest) -> RunOutcome {
        let single = request.tenant_id.is_some() || request.external_subscription_id.is_some();

        if !single {
            return match self.orchestrator.run_all(ctx).await {
                Ok(summary) => RunOutcome {
                    counts: summary.tenant_counts(),
                    result: Ok(summary.audit_message()),
                },
                Err(err) => RunOutcome {
                    counts: ExecutionCounts::default(),
                    result: Err(err.to_string()),
                },
            };
        }

        let scoped = match &request.tenant_id {
            Some(tenant_id) => ctx.for_tenant(tenant_id.clone()),
            None => ctx.clone(),
        };
        match self
            .orchestrator
            .run_pipeline(&scoped, request.external_subscription_id.as_deref())
            .await
        {
            Ok(counts) => RunOutcome {
                counts,
                result: Ok(None),
            },
            Err(failure) => {
                error!(
                    tenant_id = scoped.tenant_id.as_deref().unwrap_or("*"),
                    error = %failure.error,
                    "reconciliation pipeline failed"
                );
                RunOutcome {
                    counts: failure.counts,
                    result: Err(failure.error.to_string()),
                }
            }
        }
    }

    async fn finish(&self, execution: ExecutionRecord, outcome: RunOutcome) -> RunResponse {
        let execution_id = execution.id;
        let started_at = execution.started_at;

        let (message, audited) = match outcome.result {
            Ok(None) => (
                "Renewal reconciliation completed".to_string(),
                self.tracker.complete(execution, outcome.counts, None).await,
            ),
            Ok(Some(failures)) => (
                format!("Renewal reconciliation completed with failures: {failures}"),
                self.tracker
                    .complete(execution, outcome.counts, Some(failures))
                    .await,
            ),
            Err(err) => (
                format!("Renewal reconciliation failed: {err}"),
                self.tracker.fail(execution, outcome.counts, err).await,
            ),
        };

        let duration_ms = match audited {
            Ok(record) => record.duration_ms.unwrap_or_default(),
            Err(err) => {
                error!(execution_id, error = %err, "failed to record execution outcome");
                (Utc::now() - started_at).num_milliseconds()
            }
        };

        info!(execution_id, duration_ms, "{}", message);

        RunResponse {
            success: true,
            message,
            execution_id: Some(execution_id),
            processed_count: outcome.counts.processed,
            success_count: outcome.counts.success,
            failed_count: outcome.counts.failed,
            duration_ms,
        }
    }
}

impl std::fmt::Debug for RenewalReconciliationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalReconciliationJob")
            .field("job_name", &self.job_name)
            .field("default_limits", &self.default_limits)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Builder error
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("missing required field: {field}")]
    MissingField { field: String },
}

/// Builder for RenewalReconciliationJob
pub struct RenewalReconciliationJobBuilder {
    subscriptions: Option<Arc<dyn SubscriptionStore>>,
    executions: Option<Arc<dyn ExecutionStore>>,
    counter: Option<Arc<dyn IdCounter>>,
    gateway: Option<ProviderGateway>,
    registry: Option<Arc<dyn TenantRegistry>>,
    policy: ReconciliationPolicy,
    limits: RunLimits,
    orchestrator_config: OrchestratorConfig,
    job_name: String,
    stale_after: Duration,
}

impl RenewalReconciliationJobBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            subscriptions: None,
            executions: None,
            counter: None,
            gateway: None,
            registry: None,
            policy: ReconciliationPolicy::default(),
            limits: RunLimits::default(),
            orchestrator_config: OrchestratorConfig::default(),
            job_name: RENEWAL_RECONCILIATION_JOB.to_string(),
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
        }
    }

    /// Use one backend for subscriptions, executions and the shared counter
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: SubscriptionStore + ExecutionStore + IdCounter + 'static,
    {
        self.subscriptions = Some(store.clone());
        self.executions = Some(store.clone());
        self.counter = Some(store);
        self
    }

    pub fn with_gateway(mut self, gateway: ProviderGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Defaults to every tenant present in the subscription store
    pub fn with_registry(mut self, registry: Arc<dyn TenantRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_policy(mut self, policy: ReconciliationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_config = config;
        self
    }

    pub fn with_job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = job_name.into();
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Build the job, validating that all required fields are set
    pub fn build(self) -> Result<RenewalReconciliationJob, BuilderError> {
        let subscriptions = self.subscriptions.ok_or_else(|| BuilderError::MissingField {
            field: "subscriptions".to_string(),
        })?;
        let executions = self.executions.ok_or_else(|| BuilderError::MissingField {
            field: "executions".to_string(),
        })?;
        let counter = self.counter.ok_or_else(|| BuilderError::MissingField {
            field: "counter".to_string(),
        })?;
        let gateway = self.gateway.ok_or_else(|| BuilderError::MissingField {
            field: "gateway".to_string(),
        })?;
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StoreTenantRegistry::new(subscriptions.clone())));

        // One allocator so resyncs from either path are counted together
        let allocator = IdAllocator::new(counter);

        let orchestrator = TenantOrchestrator::new(
            CandidateSelector::new(subscriptions.clone(), self.policy.horizon_days),
            ReconciliationEngine::new(gateway, self.policy),
            ChunkWriter::new(subscriptions, allocator.clone()),
            registry,
            self.orchestrator_config,
        );
        let tracker =
            ExecutionTracker::new(executions, allocator).with_stale_after(self.stale_after);

        Ok(RenewalReconciliationJob {
            job_name: self.job_name,
            tracker,
            orchestrator,
            default_limits: self.limits,
        })
    }
}

impl Default for RenewalReconciliationJobBuilder {
    fn default() -> Self {
        Self::new()
    }
}
