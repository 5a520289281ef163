use async_trait::async_trait;
use billing_mirror_types::{
    ExecutionCounts, ExecutionRecord, ExecutionStatus, ReconciliationStatus, SubscriptionRecord,
    SubscriptionStatus, TenantId, TriggerSource,
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::error::is_primary_key_violation;
use crate::store::{
    CandidateQuery, ExecutionStore, IdCounter, SubscriptionStore, SubscriptionTx,
};
use crate::StoreError;

/// Name of the counter row shared by `subscriptions` and `job_executions`
pub const ENTITY_SEQUENCE: &str = "entity_id_seq";

const MIGRATIONS: [&str; 5] = [
    include_str!("../migrations/001_create_subscriptions.sql"),
    include_str!("../migrations/002_create_subscription_renewal_index.sql"),
    include_str!("../migrations/003_create_job_executions.sql"),
    include_str!("../migrations/004_create_id_sequence.sql"),
    include_str!("../migrations/005_seed_id_sequence.sql"),
];

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and apply the bootstrap schema
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Connect from a URL such as `sqlite://mirror.db` or `sqlite::memory:`
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        for migration in MIGRATIONS {
            sqlx::query(migration)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        }
        Ok(())
    }

    fn row_to_subscription(row: &SqliteRow) -> Result<SubscriptionRecord, StoreError> {
        let status = parse_label::<SubscriptionStatus>(row.get("status"))?;
        let reconciliation_status =
            parse_label::<ReconciliationStatus>(row.get("reconciliation_status"))?;

        Ok(SubscriptionRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            external_subscription_id: row.get("external_subscription_id"),
            status,
            current_period_start: parse_date(row.get("current_period_start"))?,
            current_period_end: parse_date(row.get("current_period_end"))?,
            trial_start: parse_optional_date(row.get("trial_start"))?,
            trial_end: parse_optional_date(row.get("trial_end"))?,
            cancel_at_period_end: row.get::<i64, _>("cancel_at_period_end") != 0,
            cancelled_at: parse_optional_timestamp(row.get("cancelled_at"))?,
            last_reconciled_at: parse_optional_timestamp(row.get("last_reconciled_at"))?,
            last_external_sync_at: parse_optional_timestamp(row.get("last_external_sync_at"))?,
            reconciliation_status,
            reconciliation_error: row.get("reconciliation_error"),
        })
    }

    fn row_to_execution(row: &SqliteRow) -> Result<ExecutionRecord, StoreError> {
        let status = parse_label::<ExecutionStatus>(row.get("status"))?;
        let trigger_source = parse_label::<TriggerSource>(row.get("trigger_source"))?;

        Ok(ExecutionRecord {
            id: row.get("id"),
            job_name: row.get("job_name"),
            status,
            tenant_id: row.get("tenant_id"),
            started_at: parse_timestamp(row.get("started_at"))?,
            completed_at: parse_optional_timestamp(row.get("completed_at"))?,
            duration_ms: row.get("duration_ms"),
            counts: ExecutionCounts {
                processed: row.get::<i64, _>("processed_count") as u64,
                success: row.get::<i64, _>("success_count") as u64,
                failed: row.get::<i64, _>("failed_count") as u64,
            },
            error_message: row.get("error_message"),
            trigger_source,
            parameters: row.get("parameters"),
        })
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn create(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, external_subscription_id, status,
                current_period_start, current_period_end, trial_start, trial_end,
                cancel_at_period_end, cancelled_at, last_reconciled_at,
                last_external_sync_at, reconciliation_status, reconciliation_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.external_subscription_id)
        .bind(record.status.as_str())
        .bind(format_date(record.current_period_start))
        .bind(format_date(record.current_period_end))
        .bind(record.trial_start.map(format_date))
        .bind(record.trial_end.map(format_date))
        .bind(record.cancel_at_period_end as i64)
        .bind(record.cancelled_at.map(format_timestamp))
        .bind(record.last_reconciled_at.map(format_timestamp))
        .bind(record.last_external_sync_at.map(format_timestamp))
        .bind(record.reconciliation_status.as_str())
        .bind(&record.reconciliation_error)
        .execute(&self.pool)
        .await;

        map_insert_result(result, record.id)
    }

    async fn get(&self, id: i64) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_subscription).transpose()
    }

    async fn find_by_external_id(
        &self,
        tenant_id: Option<&str>,
        external_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM subscriptions
            WHERE external_subscription_id = ?
            AND (? IS NULL OR tenant_id = ?)
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(external_id)
        .bind(tenant_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_subscription).transpose()
    }

    async fn list_renewal_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<SubscriptionRecord>, StoreError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT * FROM subscriptions
            WHERE status IN ('ACTIVE', 'TRIAL')
            AND cancel_at_period_end = 0
            AND external_subscription_id IS NOT NULL
            AND TRIM(external_subscription_id) <> ''
            AND current_period_end <= "#,
        );
        builder.push_bind(format_date(query.cutoff));

        if let Some(tenant_id) = &query.tenant_id {
            builder.push(" AND tenant_id = ").push_bind(tenant_id.clone());
        }

        if let Some((end, id)) = query.after {
            let end = format_date(end);
            builder
                .push(" AND (current_period_end > ")
                .push_bind(end.clone())
                .push(" OR (current_period_end = ")
                .push_bind(end)
                .push(" AND id > ")
                .push_bind(id)
                .push("))");
        }

        builder
            .push(" ORDER BY current_period_end ASC, id ASC LIMIT ")
            .push_bind(query.limit as i64);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_subscription).collect()
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM subscriptions ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(rows.iter().map(|row| row.get("tenant_id")).collect())
    }

    async fn begin(&self) -> Result<Box<dyn SubscriptionTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        Ok(Box::new(SqliteTx {
            tx: Mutex::new(Some(tx)),
        }))
    }
}

/// Write unit backed by one SQLite transaction; rolled back on drop
struct SqliteTx {
    tx: Mutex<Option<Transaction<'static, Sqlite>>>,
}

#[async_trait]
impl SubscriptionTx for SqliteTx {
    async fn save(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or(StoreError::TransactionClosed)?;

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, tenant_id, external_subscription_id, status,
                current_period_start, current_period_end, trial_start, trial_end,
                cancel_at_period_end, cancelled_at, last_reconciled_at,
                last_external_sync_at, reconciliation_status, reconciliation_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                external_subscription_id = excluded.external_subscription_id,
                status = excluded.status,
                current_period_start = excluded.current_period_start,
                current_period_end = excluded.current_period_end,
                trial_start = excluded.trial_start,
                trial_end = excluded.trial_end,
                cancel_at_period_end = excluded.cancel_at_period_end,
                cancelled_at = excluded.cancelled_at,
                last_reconciled_at = excluded.last_reconciled_at,
                last_external_sync_at = excluded.last_external_sync_at,
                reconciliation_status = excluded.reconciliation_status,
                reconciliation_error = excluded.reconciliation_error
            "#,
        )
        .bind(record.id)
        .bind(&record.tenant_id)
        .bind(&record.external_subscription_id)
        .bind(record.status.as_str())
        .bind(format_date(record.current_period_start))
        .bind(format_date(record.current_period_end))
        .bind(record.trial_start.map(format_date))
        .bind(record.trial_end.map(format_date))
        .bind(record.cancel_at_period_end as i64)
        .bind(record.cancelled_at.map(format_timestamp))
        .bind(record.last_reconciled_at.map(format_timestamp))
        .bind(record.last_external_sync_at.map(format_timestamp))
        .bind(record.reconciliation_status.as_str())
        .bind(&record.reconciliation_error)
        .execute(&mut **tx)
        .await;

        map_insert_result(result, record.id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let tx = self
            .tx
            .into_inner()
            .ok_or(StoreError::TransactionClosed)?;
        tx.commit()
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_executions (
                id, job_name, status, tenant_id, started_at, completed_at, duration_ms,
                processed_count, success_count, failed_count, error_message,
                trigger_source, parameters
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(&record.job_name)
        .bind(record.status.as_str())
        .bind(&record.tenant_id)
        .bind(format_timestamp(record.started_at))
        .bind(record.completed_at.map(format_timestamp))
        .bind(record.duration_ms)
        .bind(record.counts.processed as i64)
        .bind(record.counts.success as i64)
        .bind(record.counts.failed as i64)
        .bind(&record.error_message)
        .bind(record.trigger_source.as_str())
        .bind(&record.parameters)
        .execute(&self.pool)
        .await;

        map_insert_result(result, record.id)
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = ?, completed_at = ?, duration_ms = ?,
                processed_count = ?, success_count = ?, failed_count = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(record.status.as_str())
        .bind(record.completed_at.map(format_timestamp))
        .bind(record.duration_ms)
        .bind(record.counts.processed as i64)
        .bind(record.counts.success as i64)
        .bind(record.counts.failed as i64)
        .bind(&record.error_message)
        .bind(record.id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("execution {}", record.id)));
        }
        Ok(())
    }

    async fn get_execution(&self, id: i64) -> Result<Option<ExecutionRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM job_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn list_running(&self, job_name: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM job_executions WHERE job_name = ? AND status = 'RUNNING' ORDER BY id ASC",
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_execution).collect()
    }

    async fn list_recent(
        &self,
        job_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM job_executions WHERE job_name = ? ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(job_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_execution).collect()
    }
}

#[async_trait]
impl IdCounter for SqliteStore {
    async fn next_id(&self) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "UPDATE id_sequence SET next_val = next_val + 1 WHERE name = ? RETURNING next_val - 1 AS id",
        )
        .bind(ENTITY_SEQUENCE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(row.get("id"))
    }

    async fn peek(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT next_val FROM id_sequence WHERE name = ?")
            .bind(ENTITY_SEQUENCE)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(row.get("next_val"))
    }

    async fn max_assigned_id(&self) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT MAX(max_id) AS max_id FROM (
                SELECT COALESCE(MAX(id), 0) AS max_id FROM subscriptions
                UNION ALL
                SELECT COALESCE(MAX(id), 0) AS max_id FROM job_executions
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(row.get("max_id"))
    }

    async fn advance_to(&self, floor: i64) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "UPDATE id_sequence SET next_val = MAX(next_val, ?) WHERE name = ? RETURNING next_val",
        )
        .bind(floor)
        .bind(ENTITY_SEQUENCE)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::CounterAdjustment(e.to_string()))?;

        Ok(row.get("next_val"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════

fn map_insert_result(
    result: Result<sqlx::sqlite::SqliteQueryResult, sqlx::Error>,
    id: i64,
) -> Result<(), StoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if is_primary_key_violation(db_err.message()) => {
            Err(StoreError::DuplicateId(id.to_string()))
        }
        Err(e) => Err(StoreError::DatabaseError(e.to_string())),
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_date(s: String) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| StoreError::SerializationError(format!("invalid date {s}: {e}")))
}

fn parse_optional_date(s: Option<String>) -> Result<Option<NaiveDate>, StoreError> {
    s.map(parse_date).transpose()
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&s)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::SerializationError(format!("invalid timestamp {s}: {e}")))
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.map(parse_timestamp).transpose()
}

fn parse_label<T>(s: String) -> Result<T, StoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse::<T>()
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdAllocator;
    use billing_mirror_types::NewExecution;
    use std::sync::Arc;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn linked(id: i64, tenant: &str, end_day: u32) -> SubscriptionRecord {
        SubscriptionRecord::new(id, tenant, date(1), date(end_day))
            .with_external_id(format!("sub_{id}"))
    }

    fn new_execution(job: &str) -> NewExecution {
        NewExecution {
            job_name: job.to_string(),
            tenant_id: Some("t1".to_string()),
            trigger_source: TriggerSource::Scheduled,
            parameters: Some(r#"{"batchSize":100}"#.to_string()),
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_subscription_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut record = linked(1, "t1", 20);
        record.trial_start = Some(date(1));
        record.trial_end = Some(date(8));
        record.cancelled_at = Some(Utc::now());
        record.last_external_sync_at = Some(Utc::now());
        record.reconciliation_status = ReconciliationStatus::Updated;

        store.create(&record).await.unwrap();

        let retrieved = store.get(1).await.unwrap();
        assert_eq!(retrieved, Some(record));
    }

    #[tokio::test]
    async fn test_sqlite_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store.create(&linked(1, "t1", 20)).await.unwrap();
            assert_eq!(store.next_id().await.unwrap(), 1);
        }

        let store = SqliteStore::new(&path).await.unwrap();
        assert!(store.get(1).await.unwrap().is_some());
        // Reopening must not reseed the counter
        assert_eq!(store.peek().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_duplicate_id_error() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = linked(1, "t1", 20);

        store.create(&record).await.unwrap();
        let result = store.create(&record).await;

        assert!(matches!(result, Err(StoreError::DuplicateId(_))));
    }

    #[tokio::test]
    async fn test_sqlite_candidates_window_and_order() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create(&linked(1, "t1", 9)).await.unwrap();
        store.create(&linked(2, "t1", 5)).await.unwrap();
        store.create(&linked(3, "t1", 25)).await.unwrap();
        store.create(&linked(4, "t2", 5)).await.unwrap();
        store
            .create(&linked(5, "t1", 5).with_cancel_at_period_end(true))
            .await
            .unwrap();
        store
            .create(&linked(6, "t1", 5).with_status(SubscriptionStatus::Expired))
            .await
            .unwrap();
        store
            .create(&SubscriptionRecord::new(7, "t1", date(1), date(5)))
            .await
            .unwrap();

        let query = CandidateQuery::new(Some("t1".to_string()), date(10), 10);
        let ids: Vec<_> = store
            .list_renewal_candidates(&query)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![2, 1]);

        let next = query.after((date(5), 2));
        let ids: Vec<_> = store
            .list_renewal_candidates(&next)
            .await
            .unwrap()
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn test_sqlite_find_by_external_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.create(&linked(1, "t1", 9)).await.unwrap();

        assert!(store.find_by_external_id(None, "sub_1").await.unwrap().is_some());
        assert!(store
            .find_by_external_id(Some("t2"), "sub_1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_tenants().await.unwrap(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_sqlite_transaction_commit_and_rollback() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut record = linked(1, "t1", 9);
        store.create(&record).await.unwrap();

        record.reconciliation_status = ReconciliationStatus::Processed;
        {
            let tx = store.begin().await.unwrap();
            tx.save(&record).await.unwrap();
        }
        let stored = store.get(1).await.unwrap().unwrap();
        assert_eq!(stored.reconciliation_status, ReconciliationStatus::Pending);

        let tx = store.begin().await.unwrap();
        tx.save(&record).await.unwrap();
        tx.commit().await.unwrap();
        let stored = store.get(1).await.unwrap().unwrap();
        assert_eq!(stored.reconciliation_status, ReconciliationStatus::Processed);
    }

    #[tokio::test]
    async fn test_sqlite_period_check_constraint() {
        let store = SqliteStore::in_memory().await.unwrap();
        let record = SubscriptionRecord::new(1, "t1", date(10), date(2));
        let result = store.create(&record).await;
        assert!(matches!(result, Err(StoreError::DatabaseError(_))));
    }

    #[tokio::test]
    async fn test_sqlite_execution_lifecycle() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store.next_id().await.unwrap();
        let mut record = ExecutionRecord::start(id, &new_execution("job"));
        store.insert_execution(&record).await.unwrap();

        assert_eq!(store.list_running("job").await.unwrap().len(), 1);

        record.finish(
            ExecutionStatus::Completed,
            ExecutionCounts::new(4, 3, 1),
            None,
            Utc::now(),
        );
        store.update_execution(&record).await.unwrap();

        let stored = store.get_execution(id).await.unwrap().unwrap();
        assert_eq!(stored, record);
        assert!(store.list_running("job").await.unwrap().is_empty());
        assert_eq!(store.list_recent("job", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_counter_is_monotonic() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.next_id().await.unwrap(), 1);
        assert_eq!(store.next_id().await.unwrap(), 2);

        assert_eq!(store.advance_to(100).await.unwrap(), 100);
        assert_eq!(store.advance_to(3).await.unwrap(), 100);
        assert_eq!(store.next_id().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_sqlite_collision_recovered_by_allocator() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        // Provisioning wrote ids without touching the counter
        store.create(&linked(1, "t1", 9)).await.unwrap();
        store.create(&linked(2, "t1", 9)).await.unwrap();
        store
            .insert_execution(&ExecutionRecord::start(1, &new_execution("job")))
            .await
            .unwrap();

        let allocator = IdAllocator::new(store.clone());
        let new = new_execution("job");
        let counter = allocator.counter().as_ref();
        let executions = store.as_ref();
        let new_ref = &new;

        let record = allocator
            .save_with_resync(move || async move {
                let id = counter.next_id().await?;
                let record = ExecutionRecord::start(id, new_ref);
                executions.insert_execution(&record).await?;
                Ok(record)
            })
            .await
            .unwrap();

        assert_eq!(record.id, 3);
        assert!(store.peek().await.unwrap() >= 3);
        assert_eq!(allocator.resync_count(), 1);
    }
}
