use billing_mirror_provider::{ProviderError, ProviderGateway};
use billing_mirror_telemetry::MetricsCollector;
use billing_mirror_types::{
    ExternalSnapshot, ReconciliationStatus, RenewalCandidate, SubscriptionRecord,
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use crate::{ReconcileError, RunContext};

/// Conflict-resolution policy, fixed when the engine is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationPolicy {
    /// Days ahead of today that count as due for renewal
    pub horizon_days: u32,
    /// Act on the local period end when the provider says the renewal is not due.
    /// Provider values are still the ones written.
    pub allow_local_fallback: bool,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            horizon_days: 7,
            allow_local_fallback: false,
        }
    }
}

/// Why a candidate was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Evaluated on local dates only and not yet due
    OutsideWindow,
    /// Neither the provider nor the mirror says the renewal is due
    NotDue,
    /// Mirror says due, provider disagrees, fallback disabled
    ProviderDisagrees { delta_days: i64 },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::OutsideWindow => "outside_window",
            SkipReason::NotDue => "not_due",
            SkipReason::ProviderDisagrees { .. } => "provider_disagrees",
        }
    }
}

/// Result of evaluating one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Persist this record
    Write(SubscriptionRecord),
    /// Leave the stored record as it is
    Skip(SkipReason),
}

impl ReconcileOutcome {
    pub fn is_write(&self) -> bool {
        matches!(self, ReconcileOutcome::Write(_))
    }
}

/// Decide what to do with a record.
///
/// `snapshot` is `None` when the record is unlinked or the provider could not
/// be consulted, in which case only local dates are used. Performs no I/O.
pub fn evaluate(
    record: &SubscriptionRecord,
    snapshot: Option<&ExternalSnapshot>,
    policy: &ReconciliationPolicy,
    ctx: &RunContext,
) -> Result<ReconcileOutcome, ReconcileError> {
    let cutoff = ctx.cutoff(policy.horizon_days);
    let local_end = record.current_period_end;

    let Some(snapshot) = snapshot else {
        if local_end > cutoff {
            return Ok(ReconcileOutcome::Skip(SkipReason::OutsideWindow));
        }
        let mut processed = record.clone();
        processed.mark_reconciled(ReconciliationStatus::Processed, None, ctx.now);
        return Ok(ReconcileOutcome::Write(processed));
    };

    if snapshot.current_period_end < snapshot.current_period_start {
        return Err(ReconcileError::InvalidSnapshot {
            external_id: snapshot.external_subscription_id.clone(),
            reason: format!(
                "period ends {} before it starts {}",
                snapshot.current_period_end, snapshot.current_period_start
            ),
        });
    }

    let external_end = snapshot.current_period_end;
    if external_end > cutoff {
        if local_end > cutoff {
            return Ok(ReconcileOutcome::Skip(SkipReason::NotDue));
        }

        let delta_days = (external_end - local_end).num_days();
        if !policy.allow_local_fallback {
            warn!(
                subscription_id = record.id,
                tenant_id = %record.tenant_id,
                local_period_end = %local_end,
                external_period_end = %external_end,
                delta_days,
                "local period end is due but the billing provider disagrees; provider wins, skipping"
            );
            return Ok(ReconcileOutcome::Skip(SkipReason::ProviderDisagrees { delta_days }));
        }

        warn!(
            subscription_id = record.id,
            tenant_id = %record.tenant_id,
            local_period_end = %local_end,
            external_period_end = %external_end,
            delta_days,
            "local period end is due but the billing provider disagrees; local fallback enabled, processing"
        );
    }

    let mut synced = record.clone();
    let changed = mirror_snapshot(&mut synced, snapshot);
    let status = if changed {
        ReconciliationStatus::Updated
    } else {
        ReconciliationStatus::Synced
    };
    synced.last_external_sync_at = Some(ctx.now);
    synced.mark_reconciled(status, None, ctx.now);
    Ok(ReconcileOutcome::Write(synced))
}

/// Copy provider-owned fields onto the mirror, returning whether any differed
fn mirror_snapshot(record: &mut SubscriptionRecord, snapshot: &ExternalSnapshot) -> bool {
    let mut changed = false;

    macro_rules! mirror {
        ($field:ident, $value:expr) => {
            if record.$field != $value {
                record.$field = $value;
                changed = true;
            }
        };
    }

    mirror!(current_period_start, snapshot.current_period_start);
    mirror!(current_period_end, snapshot.current_period_end);
    mirror!(status, snapshot.status);
    mirror!(trial_start, snapshot.trial_start);
    mirror!(trial_end, snapshot.trial_end);
    mirror!(cancel_at_period_end, snapshot.cancel_at_period_end);
    if snapshot.confirms_termination() {
        mirror!(cancelled_at, snapshot.cancelled_at);
    }

    changed
}

/// Evaluates candidates against the billing provider
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    gateway: ProviderGateway,
    policy: ReconciliationPolicy,
    metrics: MetricsCollector,
}

impl ReconciliationEngine {
    pub fn new(gateway: ProviderGateway, policy: ReconciliationPolicy) -> Self {
        Self {
            gateway,
            policy,
            metrics: MetricsCollector::new(),
        }
    }

    /// Evaluate one candidate. Never fails: unexpected errors and panics come
    /// back as a write carrying reconciliation status ERROR.
    pub async fn process(&self, candidate: &RenewalCandidate, ctx: &RunContext) -> ReconcileOutcome {
        let record = &candidate.record;
        let attempt = AssertUnwindSafe(self.try_process(record, ctx))
            .catch_unwind()
            .await;

        let outcome = match attempt {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => self.error_outcome(record, err, ctx),
            Err(payload) => self.error_outcome(record, ReconcileError::from_panic(payload), ctx),
        };

        match &outcome {
            ReconcileOutcome::Write(written) => {
                self.metrics.record_outcome(written.reconciliation_status);
                debug!(
                    subscription_id = written.id,
                    status = %written.reconciliation_status,
                    explicit = candidate.explicit,
                    "candidate reconciled"
                );
            }
            ReconcileOutcome::Skip(reason) => {
                self.metrics.record_skip(reason.as_str());
                debug!(subscription_id = record.id, reason = reason.as_str(), "candidate skipped");
            }
        }

        outcome
    }

    async fn try_process(
        &self,
        record: &SubscriptionRecord,
        ctx: &RunContext,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let external_id = match record.external_subscription_id.as_deref() {
            Some(id) if record.is_linked() => id,
            _ => return evaluate(record, None, &self.policy, ctx),
        };

        match self.gateway.fetch(&record.tenant_id, external_id).await {
            Ok(snapshot) => evaluate(record, Some(&snapshot), &self.policy, ctx),
            Err(err) => {
                self.metrics.record_provider_fallback(fallback_cause(&err));
                warn!(
                    subscription_id = record.id,
                    tenant_id = %record.tenant_id,
                    external_subscription_id = external_id,
                    error = %err,
                    "billing provider lookup failed, evaluating on local dates"
                );
                evaluate(record, None, &self.policy, ctx)
            }
        }
    }

    fn error_outcome(
        &self,
        record: &SubscriptionRecord,
        err: ReconcileError,
        ctx: &RunContext,
    ) -> ReconcileOutcome {
        error!(
            subscription_id = record.id,
            tenant_id = %record.tenant_id,
            error = %err,
            "unexpected failure while reconciling subscription"
        );
        let mut failed = record.clone();
        failed.mark_reconciled(ReconciliationStatus::Error, Some(err.to_string()), ctx.now);
        info!(subscription_id = record.id, "error recorded on subscription");
        ReconcileOutcome::Write(failed)
    }
}

fn fallback_cause(err: &ProviderError) -> &'static str {
    match err {
        ProviderError::Unavailable(_) => "unavailable",
        ProviderError::ConfigurationMissing { .. } => "configuration_missing",
        ProviderError::Timeout { .. } => "timeout",
        ProviderError::InvalidResponse(_) => "invalid_response",
        ProviderError::NotFound(_) => "not_found",
    }
}
