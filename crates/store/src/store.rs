use async_trait::async_trait;
use billing_mirror_types::{ExecutionRecord, ExecutionStatus, SubscriptionRecord, TenantId};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::StoreError;

// ═══════════════════════════════════════════════════════════════════════════
// QUERY TYPES
// ═══════════════════════════════════════════════════════════════════════════

/// One page of the windowed renewal scan.
///
/// Results are ordered by `(current_period_end, id)` ascending; `after` is the
/// keyset position of the last row of the previous page.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub tenant_id: Option<TenantId>,
    pub cutoff: NaiveDate,
    pub after: Option<(NaiveDate, i64)>,
    pub limit: usize,
}

impl CandidateQuery {
    pub fn new(tenant_id: Option<TenantId>, cutoff: NaiveDate, limit: usize) -> Self {
        Self {
            tenant_id,
            cutoff,
            after: None,
            limit,
        }
    }

    pub fn after(mut self, position: (NaiveDate, i64)) -> Self {
        self.after = Some(position);
        self
    }

    /// Whether a record belongs in this page (ignoring the limit)
    pub fn admits(&self, record: &SubscriptionRecord) -> bool {
        if let Some(tenant_id) = &self.tenant_id {
            if &record.tenant_id != tenant_id {
                return false;
            }
        }
        if let Some(after) = self.after {
            if (record.current_period_end, record.id) <= after {
                return false;
            }
        }
        record.matches_renewal_window(self.cutoff)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAITS
// ═══════════════════════════════════════════════════════════════════════════

/// Mirrored subscription storage
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert a subscription with the identifier it already carries
    async fn create(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;

    async fn get(&self, id: i64) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Look up by provider identifier, scoped to a tenant when one is given
    async fn find_by_external_id(
        &self,
        tenant_id: Option<&str>,
        external_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// One page of renewal candidates
    async fn list_renewal_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<SubscriptionRecord>, StoreError>;

    /// Distinct tenants owning at least one subscription
    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError>;

    /// Open an atomic write unit
    async fn begin(&self) -> Result<Box<dyn SubscriptionTx>, StoreError>;
}

/// Atomic group of subscription saves. Dropping without commit discards every save.
#[async_trait]
pub trait SubscriptionTx: Send + Sync {
    /// Insert or update by identifier
    async fn save(&self, record: &SubscriptionRecord) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Job execution audit storage
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    async fn get_execution(&self, id: i64) -> Result<Option<ExecutionRecord>, StoreError>;

    /// Executions of a job still marked RUNNING
    async fn list_running(&self, job_name: &str) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Most recent executions of a job, newest first
    async fn list_recent(
        &self,
        job_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// Identifier counter shared by every table that draws ids from it.
///
/// `advance_to` must be monotonic: it sets the next value to
/// `max(next, floor)` and never lowers it, so concurrent callers converge.
#[async_trait]
pub trait IdCounter: Send + Sync {
    /// Take the next identifier
    async fn next_id(&self) -> Result<i64, StoreError>;

    /// The value `next_id` would return next
    async fn peek(&self) -> Result<i64, StoreError>;

    /// Largest identifier present in any table sharing this counter, 0 when empty
    async fn max_assigned_id(&self) -> Result<i64, StoreError>;

    /// Raise the next value to at least `floor`, returning the resulting next value
    async fn advance_to(&self, floor: i64) -> Result<i64, StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE (for testing)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Faults {
    failing_tenants: HashSet<TenantId>,
    failing_subscriptions: HashSet<i64>,
    failing_listing_tenants: HashSet<TenantId>,
    counter_locked: bool,
}

/// In-memory implementation of every store trait sharing a single counter
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    subscriptions: Arc<RwLock<BTreeMap<i64, SubscriptionRecord>>>,
    executions: Arc<RwLock<BTreeMap<i64, ExecutionRecord>>>,
    next_id: Arc<AtomicI64>,
    faults: Arc<Mutex<Faults>>,
    commits: Arc<AtomicI64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(BTreeMap::new())),
            executions: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            faults: Arc::new(Mutex::new(Faults::default())),
            commits: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Make every save for this tenant fail with a storage error (for testing)
    pub async fn fail_saves_for_tenant(&self, tenant_id: impl Into<TenantId>) {
        self.faults
            .lock()
            .await
            .failing_tenants
            .insert(tenant_id.into());
    }

    /// Make saves of one subscription fail with a storage error (for testing)
    pub async fn fail_saves_for_subscription(&self, id: i64) {
        self.faults.lock().await.failing_subscriptions.insert(id);
    }

    /// Make candidate listing fail for this tenant (for testing)
    pub async fn fail_listing_for_tenant(&self, tenant_id: impl Into<TenantId>) {
        self.faults
            .lock()
            .await
            .failing_listing_tenants
            .insert(tenant_id.into());
    }

    /// Refuse counter adjustments, as a role without sequence privileges would (for testing)
    pub async fn lock_counter(&self) {
        self.faults.lock().await.counter_locked = true;
    }

    /// Number of committed write units (for testing)
    pub fn commit_count(&self) -> i64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn create(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&record.id) {
            return Err(StoreError::DuplicateId(record.id.to_string()));
        }
        subscriptions.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        tenant_id: Option<&str>,
        external_id: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        Ok(self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|s| tenant_id.map_or(true, |t| s.tenant_id == t))
            .find(|s| s.external_subscription_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list_renewal_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<SubscriptionRecord>, StoreError> {
        if let Some(tenant_id) = &query.tenant_id {
            if self
                .faults
                .lock()
                .await
                .failing_listing_tenants
                .contains(tenant_id)
            {
                return Err(StoreError::ConnectionError(format!(
                    "simulated listing failure for tenant {tenant_id}"
                )));
            }
        }

        let subscriptions = self.subscriptions.read().await;
        let mut results: Vec<_> = subscriptions
            .values()
            .filter(|s| query.admits(s))
            .cloned()
            .collect();

        results.sort_by_key(|s| (s.current_period_end, s.id));
        results.truncate(query.limit);
        Ok(results)
    }

    async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let subscriptions = self.subscriptions.read().await;
        let mut tenants: Vec<_> = subscriptions
            .values()
            .map(|s| s.tenant_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn begin(&self) -> Result<Box<dyn SubscriptionTx>, StoreError> {
        Ok(Box::new(InMemoryTx {
            store: self.clone(),
            staged: Mutex::new(Vec::new()),
        }))
    }
}

struct InMemoryTx {
    store: InMemoryStore,
    staged: Mutex<Vec<SubscriptionRecord>>,
}

#[async_trait]
impl SubscriptionTx for InMemoryTx {
    async fn save(&self, record: &SubscriptionRecord) -> Result<(), StoreError> {
        {
            let faults = self.store.faults.lock().await;
            if faults.failing_tenants.contains(&record.tenant_id) {
                return Err(StoreError::DatabaseError(format!(
                    "simulated write failure for tenant {}",
                    record.tenant_id
                )));
            }
            if faults.failing_subscriptions.contains(&record.id) {
                return Err(StoreError::DatabaseError(format!(
                    "simulated write failure for subscription {}",
                    record.id
                )));
            }
        }
        if record.current_period_end < record.current_period_start {
            return Err(StoreError::DatabaseError(format!(
                "CHECK constraint failed: period end before start for subscription {}",
                record.id
            )));
        }
        self.staged.lock().await.push(record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let staged = self.staged.into_inner();
        let mut subscriptions = self.store.subscriptions.write().await;
        for record in staged {
            subscriptions.insert(record.id, record);
        }
        self.store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&record.id) {
            return Err(StoreError::DatabaseError(format!(
                "UNIQUE constraint failed: job_executions.id ({})",
                record.id
            )));
        }
        executions.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("execution {}", record.id))),
        }
    }

    async fn get_execution(&self, id: i64) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn list_running(&self, job_name: &str) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.job_name == job_name && e.status == ExecutionStatus::Running)
            .cloned()
            .collect())
    }

    async fn list_recent(
        &self,
        job_name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let executions = self.executions.read().await;
        let mut results: Vec<_> = executions
            .values()
            .filter(|e| e.job_name == job_name)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        results.truncate(limit);
        Ok(results)
    }
}

#[async_trait]
impl IdCounter for InMemoryStore {
    async fn next_id(&self) -> Result<i64, StoreError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn peek(&self) -> Result<i64, StoreError> {
        Ok(self.next_id.load(Ordering::SeqCst))
    }

    async fn max_assigned_id(&self) -> Result<i64, StoreError> {
        let subscriptions = self.subscriptions.read().await;
        let executions = self.executions.read().await;
        let max_subscription = subscriptions.keys().next_back().copied().unwrap_or(0);
        let max_execution = executions.keys().next_back().copied().unwrap_or(0);
        Ok(max_subscription.max(max_execution))
    }

    async fn advance_to(&self, floor: i64) -> Result<i64, StoreError> {
        if self.faults.lock().await.counter_locked {
            return Err(StoreError::CounterAdjustment(
                "permission denied for sequence entity_id_seq".to_string(),
            ));
        }
        let previous = self.next_id.fetch_max(floor, Ordering::SeqCst);
        Ok(previous.max(floor))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
