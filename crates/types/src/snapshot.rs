use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::SubscriptionStatus;

/// Live view of a subscription as reported by the billing provider.
///
/// Exists only for the duration of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSnapshot {
    pub external_subscription_id: String,
    pub status: SubscriptionStatus,
    pub current_period_start: NaiveDate,
    pub current_period_end: NaiveDate,
    pub trial_start: Option<NaiveDate>,
    pub trial_end: Option<NaiveDate>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl ExternalSnapshot {
    pub fn new(
        external_subscription_id: impl Into<String>,
        status: SubscriptionStatus,
        current_period_start: NaiveDate,
        current_period_end: NaiveDate,
    ) -> Self {
        Self {
            external_subscription_id: external_subscription_id.into(),
            status,
            current_period_start,
            current_period_end,
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            cancelled_at: None,
        }
    }

    pub fn with_cancellation(mut self, at_period_end: bool, cancelled_at: Option<DateTime<Utc>>) -> Self {
        self.cancel_at_period_end = at_period_end;
        self.cancelled_at = cancelled_at;
        self
    }

    pub fn with_trial(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.trial_start = Some(start);
        self.trial_end = Some(end);
        self
    }

    /// Provider confirms the subscription is terminated
    pub fn confirms_termination(&self) -> bool {
        self.status.is_terminated() && self.cancelled_at.is_some()
    }
}

/// A record selected for evaluation together with the cutoff it was selected against
#[derive(Debug, Clone, PartialEq)]
pub struct RenewalCandidate {
    pub record: crate::SubscriptionRecord,
    pub cutoff: NaiveDate,
    /// Selected by explicit external identifier, bypassing window filters
    pub explicit: bool,
}
