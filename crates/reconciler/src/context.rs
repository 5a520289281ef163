use billing_mirror_types::TenantId;
use chrono::{DateTime, Days, NaiveDate, Utc};

/// Size limits for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Records per atomic write, and per selection page
    pub chunk_size: usize,
    /// Upper bound on candidates selected per tenant
    pub max_records: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_records: 1000,
        }
    }
}

/// Per-invocation state, passed explicitly through the pipeline.
///
/// Nothing here outlives a run; components hold configuration only.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub now: DateTime<Utc>,
    pub today: NaiveDate,
    pub tenant_id: Option<TenantId>,
    pub limits: RunLimits,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            today: now.date_naive(),
            tenant_id: None,
            limits: RunLimits::default(),
        }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Narrow the context to one tenant
    pub fn for_tenant(&self, tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..self.clone()
        }
    }

    /// Last period-end date that counts as due: `today + horizon_days`,
    /// saturating at the last representable date
    pub fn cutoff(&self, horizon_days: u32) -> NaiveDate {
        self.today
            .checked_add_days(Days::new(u64::from(horizon_days)))
            .unwrap_or(NaiveDate::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_cutoff_adds_horizon() {
        let ctx = RunContext::new(Utc.with_ymd_and_hms(2024, 2, 26, 23, 59, 0).unwrap());
        assert_eq!(ctx.cutoff(7), NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
        assert_eq!(ctx.cutoff(0), ctx.today);
    }

    #[test]
    fn test_cutoff_saturates_on_huge_horizon() {
        let ctx = RunContext::now();
        assert_eq!(ctx.cutoff(u32::MAX), NaiveDate::MAX);
    }

    #[test]
    fn test_for_tenant_keeps_clock() {
        let ctx = RunContext::now();
        let scoped = ctx.for_tenant("t1");
        assert_eq!(scoped.now, ctx.now);
        assert_eq!(scoped.tenant_id.as_deref(), Some("t1"));
        assert!(ctx.tenant_id.is_none());
    }
}
