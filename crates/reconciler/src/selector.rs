use billing_mirror_store::{CandidateQuery, SubscriptionStore};
use billing_mirror_types::{RenewalCandidate, SubscriptionRecord};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{ReconcileError, RunContext};

/// Lazy, finite sequence of renewal candidates
pub type CandidateStream = BoxStream<'static, Result<RenewalCandidate, ReconcileError>>;

/// Picks the records a run should evaluate
#[derive(Clone)]
pub struct CandidateSelector {
    store: Arc<dyn SubscriptionStore>,
    horizon_days: u32,
}

struct ScanState {
    query: CandidateQuery,
    remaining: usize,
    seen: HashSet<i64>,
}

impl CandidateSelector {
    pub fn new(store: Arc<dyn SubscriptionStore>, horizon_days: u32) -> Self {
        Self {
            store,
            horizon_days,
        }
    }

    /// Candidates for `ctx.tenant_id` (all tenants when unset).
    ///
    /// With an explicit external identifier only that record is returned,
    /// whatever its state; otherwise the renewal window is scanned.
    pub fn select(&self, ctx: &RunContext, external_id: Option<&str>) -> CandidateStream {
        match external_id {
            Some(external_id) => self.lookup(ctx, external_id.to_string()),
            None => self.scan(ctx),
        }
    }

    fn lookup(&self, ctx: &RunContext, external_id: String) -> CandidateStream {
        let store = self.store.clone();
        let tenant_id = ctx.tenant_id.clone();
        let cutoff = ctx.cutoff(self.horizon_days);

        stream::once(async move {
            let found = store
                .find_by_external_id(tenant_id.as_deref(), &external_id)
                .await?;
            if found.is_none() {
                warn!(
                    tenant_id = tenant_id.as_deref().unwrap_or("*"),
                    external_subscription_id = %external_id,
                    "explicitly requested subscription not found"
                );
            }
            Ok::<_, ReconcileError>(found)
        })
        .try_filter_map(move |found| async move {
            Ok(found.map(|record| RenewalCandidate {
                record,
                cutoff,
                explicit: true,
            }))
        })
        .boxed()
    }

    fn scan(&self, ctx: &RunContext) -> CandidateStream {
        let store = self.store.clone();
        let cutoff = ctx.cutoff(self.horizon_days);
        let page_size = ctx.limits.chunk_size.max(1);
        let state = ScanState {
            query: CandidateQuery::new(ctx.tenant_id.clone(), cutoff, page_size),
            remaining: ctx.limits.max_records,
            seen: HashSet::new(),
        };

        stream::try_unfold(Some(state), move |state| {
            let store = store.clone();
            async move {
                let Some(mut state) = state else {
                    return Ok(None);
                };
                if state.remaining == 0 {
                    return Ok(None);
                }

                let page_query = CandidateQuery {
                    limit: page_size.min(state.remaining),
                    ..state.query.clone()
                };
                let page = store.list_renewal_candidates(&page_query).await?;
                let exhausted = page.len() < page_query.limit;
                let last_position = page.last().map(|r| (r.current_period_end, r.id));

                debug!(
                    tenant_id = page_query.tenant_id.as_deref().unwrap_or("*"),
                    rows = page.len(),
                    "fetched renewal candidate page"
                );

                // Rows rewritten by an earlier chunk may sort again further on
                let fresh: Vec<SubscriptionRecord> = page
                    .into_iter()
                    .filter(|record| state.seen.insert(record.id))
                    .take(state.remaining)
                    .collect();
                state.remaining -= fresh.len();

                let next = match last_position {
                    Some(position) if !exhausted => {
                        state.query = state.query.after(position);
                        Some(state)
                    }
                    _ => None,
                };

                let candidates = fresh.into_iter().map(move |record| {
                    Ok::<_, ReconcileError>(RenewalCandidate {
                        record,
                        cutoff,
                        explicit: false,
                    })
                });

                if next.is_none() && candidates.len() == 0 {
                    return Ok(None);
                }
                Ok::<_, ReconcileError>(Some((stream::iter(candidates), next)))
            }
        })
        .try_flatten()
        .boxed()
    }
}

impl std::fmt::Debug for CandidateSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateSelector")
            .field("horizon_days", &self.horizon_days)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunLimits;
    use billing_mirror_store::{InMemoryStore, StoreError};
    use billing_mirror_types::SubscriptionStatus;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn ctx(limits: RunLimits) -> RunContext {
        RunContext::new(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()).with_limits(limits)
    }

    fn record(id: i64, tenant: &str, end_in_days: i64) -> SubscriptionRecord {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        SubscriptionRecord::new(id, tenant, today - Duration::days(30), today + Duration::days(end_in_days))
            .with_external_id(format!("sub_{id}"))
    }

    async fn ids(stream: CandidateStream) -> Vec<i64> {
        stream
            .map_ok(|c| c.record.id)
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_orders_by_period_end_and_caps() {
        let store = Arc::new(InMemoryStore::new());
        store.create(&record(1, "t1", 6)).await.unwrap();
        store.create(&record(2, "t1", 1)).await.unwrap();
        store.create(&record(3, "t1", 3)).await.unwrap();
        store.create(&record(4, "t1", 30)).await.unwrap();
        let selector = CandidateSelector::new(store, 7);

        let ctx = ctx(RunLimits {
            chunk_size: 2,
            max_records: 10,
        })
        .for_tenant("t1");
        assert_eq!(ids(selector.select(&ctx, None)).await, vec![2, 3, 1]);

        let capped = RunContext {
            limits: RunLimits {
                chunk_size: 2,
                max_records: 2,
            },
            ..ctx.clone()
        };
        assert_eq!(ids(selector.select(&capped, None)).await, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_scan_spans_tenants_in_legacy_mode() {
        let store = Arc::new(InMemoryStore::new());
        store.create(&record(1, "t1", 2)).await.unwrap();
        store.create(&record(2, "t2", 1)).await.unwrap();
        let selector = CandidateSelector::new(store, 7);

        let all = selector.select(&ctx(RunLimits::default()), None);
        assert_eq!(ids(all).await, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_explicit_lookup_bypasses_filters() {
        let store = Arc::new(InMemoryStore::new());
        let excluded = record(1, "t1", 90)
            .with_status(SubscriptionStatus::Suspended)
            .with_cancel_at_period_end(true);
        store.create(&excluded).await.unwrap();
        let selector = CandidateSelector::new(store, 7);
        let ctx = ctx(RunLimits::default()).for_tenant("t1");

        let found: Vec<_> = selector
            .select(&ctx, Some("sub_1"))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].explicit);

        assert!(ids(selector.select(&ctx, Some("sub_404"))).await.is_empty());
        let other_tenant = ctx.for_tenant("t2");
        assert!(ids(selector.select(&other_tenant, Some("sub_1"))).await.is_empty());
    }

    #[tokio::test]
    async fn test_storage_errors_propagate() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_listing_for_tenant("t1").await;
        let selector = CandidateSelector::new(store, 7);
        let ctx = ctx(RunLimits::default()).for_tenant("t1");

        let result: Result<Vec<_>, _> = selector.select(&ctx, None).try_collect().await;
        assert!(matches!(
            result,
            Err(ReconcileError::Store(StoreError::ConnectionError(_)))
        ));
    }

    #[tokio::test]
    async fn test_rows_moved_by_writes_are_not_repeated() {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=4 {
            store.create(&record(id, "t1", 1)).await.unwrap();
        }
        let selector = CandidateSelector::new(store.clone(), 7);
        let ctx = ctx(RunLimits {
            chunk_size: 2,
            max_records: 10,
        });

        let mut stream = selector.select(&ctx, None);
        let mut seen = Vec::new();
        while let Some(candidate) = stream.try_next().await.unwrap() {
            // Push the first row past every other row, as a self-heal would
            if candidate.record.id == 1 {
                let mut moved = candidate.record.clone();
                moved.current_period_end += Duration::days(4);
                let tx = store.begin().await.unwrap();
                tx.save(&moved).await.unwrap();
                tx.commit().await.unwrap();
            }
            seen.push(candidate.record.id);
        }

        assert_eq!(seen, vec![1, 2, 3, 4]);
    }
}
