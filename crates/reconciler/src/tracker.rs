use billing_mirror_store::{ExecutionStore, IdAllocator};
use billing_mirror_telemetry::MetricsCollector;
use billing_mirror_types::{ExecutionCounts, ExecutionRecord, ExecutionStatus, NewExecution};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::ReconcileError;

/// Seconds after which a RUNNING execution no longer blocks a new start
pub const DEFAULT_STALE_AFTER_SECS: i64 = 2 * 60 * 60;

/// Writes one audit entry per pipeline invocation
#[derive(Clone)]
pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    allocator: IdAllocator,
    stale_after: Duration,
    /// Serialises the running check with the insert that follows it
    start_guard: Arc<Mutex<()>>,
    metrics: MetricsCollector,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, allocator: IdAllocator) -> Self {
        Self {
            store,
            allocator,
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
            start_guard: Arc::new(Mutex::new(())),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Insert a RUNNING entry, refusing while a recent run of the same job is live
    pub async fn start(&self, new: NewExecution) -> Result<ExecutionRecord, ReconcileError> {
        let _guard = self.start_guard.lock().await;
        self.ensure_not_running(&new.job_name, new.started_at).await?;

        let counter = self.allocator.counter().as_ref();
        let store = self.store.as_ref();
        let new_ref = &new;
        let record = self
            .allocator
            .save_with_resync(move || async move {
                let id = counter.next_id().await?;
                let record = ExecutionRecord::start(id, new_ref);
                store.insert_execution(&record).await?;
                Ok(record)
            })
            .await?;

        self.metrics.record_run_started();
        info!(
            execution_id = record.id,
            job = %record.job_name,
            trigger = %record.trigger_source,
            "execution started"
        );
        Ok(record)
    }

    pub async fn complete(
        &self,
        record: ExecutionRecord,
        counts: ExecutionCounts,
        message: Option<String>,
    ) -> Result<ExecutionRecord, ReconcileError> {
        self.finish(record, ExecutionStatus::Completed, counts, message)
            .await
    }

    pub async fn fail(
        &self,
        record: ExecutionRecord,
        counts: ExecutionCounts,
        error: impl Into<String>,
    ) -> Result<ExecutionRecord, ReconcileError> {
        self.finish(record, ExecutionStatus::Failed, counts, Some(error.into()))
            .await
    }

    pub async fn get(&self, id: i64) -> Result<Option<ExecutionRecord>, ReconcileError> {
        Ok(self.store.get_execution(id).await?)
    }

    /// Latest executions of a job, newest first
    pub async fn recent(
        &self,
        job_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, ReconcileError> {
        Ok(self.store.list_recent(job_name, limit).await?)
    }

    async fn finish(
        &self,
        mut record: ExecutionRecord,
        status: ExecutionStatus,
        counts: ExecutionCounts,
        message: Option<String>,
    ) -> Result<ExecutionRecord, ReconcileError> {
        record.finish(status, counts, message, Utc::now());
        self.store.update_execution(&record).await?;

        let duration_ms = record.duration_ms.unwrap_or_default().max(0) as u64;
        self.metrics
            .record_run_finished(std::time::Duration::from_millis(duration_ms));
        info!(
            execution_id = record.id,
            status = %record.status,
            processed = counts.processed,
            success = counts.success,
            failed = counts.failed,
            duration_ms,
            "execution finished"
        );
        Ok(record)
    }

    async fn ensure_not_running(
        &self,
        job_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ReconcileError> {
        let running = self.store.list_running(job_name).await?;
        let live = running
            .iter()
            .filter(|execution| now - execution.started_at < self.stale_after)
            .max_by_key(|execution| execution.started_at);

        if let Some(execution) = live {
            warn!(
                job = job_name,
                execution_id = execution.id,
                started_at = %execution.started_at,
                "refusing to start, job already running"
            );
            return Err(ReconcileError::AlreadyRunning {
                job_name: job_name.to_string(),
                execution_id: execution.id,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ExecutionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTracker")
            .field("stale_after", &self.stale_after)
            .finish()
    }
}
