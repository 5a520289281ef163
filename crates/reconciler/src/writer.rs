use billing_mirror_store::{IdAllocator, SubscriptionStore};
use billing_mirror_telemetry::MetricsCollector;
use billing_mirror_types::SubscriptionRecord;
use std::sync::Arc;
use tracing::{debug, error};

use crate::ReconcileError;

/// Commits reconciled records in atomic chunks
#[derive(Clone)]
pub struct ChunkWriter {
    store: Arc<dyn SubscriptionStore>,
    allocator: IdAllocator,
    metrics: MetricsCollector,
}

impl ChunkWriter {
    pub fn new(store: Arc<dyn SubscriptionStore>, allocator: IdAllocator) -> Self {
        Self {
            store,
            allocator,
            metrics: MetricsCollector::new(),
        }
    }

    /// Write every record in one transaction.
    ///
    /// Each save goes through the identifier allocator. Any other failure
    /// rolls the whole chunk back and is returned as is.
    pub async fn write_chunk(&self, records: &[SubscriptionRecord]) -> Result<usize, ReconcileError> {
        if records.is_empty() {
            return Ok(0);
        }

        let resyncs_before = self.allocator.resync_count();
        let tx = self.store.begin().await?;

        for record in records {
            let tx = &tx;
            if let Err(err) = self.allocator.save_with_resync(|| tx.save(record)).await {
                error!(
                    subscription_id = record.id,
                    tenant_id = %record.tenant_id,
                    chunk_len = records.len(),
                    error = %err,
                    "save failed, rolling back chunk"
                );
                return Err(err.into());
            }
        }

        tx.commit().await?;

        self.metrics.record_chunk_committed();
        self.metrics
            .record_identifier_resyncs(self.allocator.resync_count() - resyncs_before);
        debug!(records = records.len(), "chunk committed");

        Ok(records.len())
    }
}

impl std::fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("allocator", &self.allocator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billing_mirror_store::{InMemoryStore, StoreError};
    use billing_mirror_types::ReconciliationStatus;
    use chrono::{NaiveDate, Utc};

    fn record(id: i64, tenant: &str) -> SubscriptionRecord {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        SubscriptionRecord::new(id, tenant, start, end)
    }

    fn writer(store: &Arc<InMemoryStore>) -> ChunkWriter {
        ChunkWriter::new(store.clone(), IdAllocator::new(store.clone()))
    }

    #[tokio::test]
    async fn test_chunk_commits_atomically() {
        let store = Arc::new(InMemoryStore::new());
        let mut records = vec![record(1, "t1"), record(2, "t1")];
        for r in &records {
            store.create(r).await.unwrap();
        }
        for r in &mut records {
            r.mark_reconciled(ReconciliationStatus::Processed, None, Utc::now());
        }

        let written = writer(&store).write_chunk(&records).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.commit_count(), 1);
        let stored = store.get(2).await.unwrap().unwrap();
        assert_eq!(stored.reconciliation_status, ReconciliationStatus::Processed);
    }

    #[tokio::test]
    async fn test_failed_save_rolls_back_chunk() {
        let store = Arc::new(InMemoryStore::new());
        store.create(&record(1, "t1")).await.unwrap();
        store.create(&record(2, "t2")).await.unwrap();
        store.fail_saves_for_tenant("t2").await;

        let mut chunk = vec![record(1, "t1"), record(2, "t2")];
        for r in &mut chunk {
            r.mark_reconciled(ReconciliationStatus::Processed, None, Utc::now());
        }

        let result = writer(&store).write_chunk(&chunk).await;

        assert!(matches!(
            result,
            Err(ReconcileError::Store(StoreError::DatabaseError(_)))
        ));
        assert_eq!(store.commit_count(), 0);
        let untouched = store.get(1).await.unwrap().unwrap();
        assert_eq!(untouched.reconciliation_status, ReconciliationStatus::Pending);
    }

    #[tokio::test]
    async fn test_empty_chunk_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        assert_eq!(writer(&store).write_chunk(&[]).await.unwrap(), 0);
        assert_eq!(store.commit_count(), 0);
    }
}
