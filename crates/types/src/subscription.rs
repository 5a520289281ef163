use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a tenant owning subscriptions
pub type TenantId = String;

/// Error returned when a persisted enum label cannot be parsed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle status of a subscription as mirrored from the billing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    PastDue,
    Cancelled,
    Suspended,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Trial => "TRIAL",
            SubscriptionStatus::PastDue => "PAST_DUE",
            SubscriptionStatus::Cancelled => "CANCELLED",
            SubscriptionStatus::Suspended => "SUSPENDED",
            SubscriptionStatus::Expired => "EXPIRED",
        }
    }

    /// Statuses eligible for the windowed renewal scan
    pub fn is_renewable(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }

    /// Statuses that mean the provider has terminated the subscription
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired
        )
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "TRIAL" => Ok(SubscriptionStatus::Trial),
            "PAST_DUE" => Ok(SubscriptionStatus::PastDue),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            "SUSPENDED" => Ok(SubscriptionStatus::Suspended),
            "EXPIRED" => Ok(SubscriptionStatus::Expired),
            other => Err(ParseLabelError {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

/// Outcome of the most recent reconciliation attempt for a record.
///
/// Every attempt overwrites the previous value; no history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationStatus {
    #[default]
    Pending,
    /// External values fetched and identical to the mirror
    Synced,
    /// External values fetched and written over the mirror
    Updated,
    /// Processed from local dates only
    Processed,
    Error,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Pending => "PENDING",
            ReconciliationStatus::Synced => "SYNCED",
            ReconciliationStatus::Updated => "UPDATED",
            ReconciliationStatus::Processed => "PROCESSED",
            ReconciliationStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconciliationStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ReconciliationStatus::Pending),
            "SYNCED" => Ok(ReconciliationStatus::Synced),
            "UPDATED" => Ok(ReconciliationStatus::Updated),
            "PROCESSED" => Ok(ReconciliationStatus::Processed),
            "ERROR" => Ok(ReconciliationStatus::Error),
            other => Err(ParseLabelError {
                kind: "reconciliation status",
                value: other.to_string(),
            }),
        }
    }
}

/// Local mirror of a subscription held by the billing provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRecord {
    pub id: i64,
    pub tenant_id: TenantId,
    pub external_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_start: NaiveDate,
    pub current_period_end: NaiveDate,
    pub trial_start: Option<NaiveDate>,
    pub trial_end: Option<NaiveDate>,
    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub last_external_sync_at: Option<DateTime<Utc>>,
    pub reconciliation_status: ReconciliationStatus,
    pub reconciliation_error: Option<String>,
}

impl SubscriptionRecord {
    /// Create an active, never-reconciled subscription
    pub fn new(
        id: i64,
        tenant_id: impl Into<TenantId>,
        current_period_start: NaiveDate,
        current_period_end: NaiveDate,
    ) -> Self {
        Self {
            id,
            tenant_id: tenant_id.into(),
            external_subscription_id: None,
            status: SubscriptionStatus::Active,
            current_period_start,
            current_period_end,
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            last_reconciled_at: None,
            last_external_sync_at: None,
            reconciliation_status: ReconciliationStatus::Pending,
            reconciliation_error: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_subscription_id = Some(external_id.into());
        self
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_cancel_at_period_end(mut self, cancel: bool) -> Self {
        self.cancel_at_period_end = cancel;
        self
    }

    /// Linked to a subscription at the billing provider
    pub fn is_linked(&self) -> bool {
        self.external_subscription_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty())
    }

    /// Period end falls on or before the renewal cutoff
    pub fn is_due(&self, cutoff: NaiveDate) -> bool {
        self.current_period_end <= cutoff
    }

    /// Whether the windowed scan would select this record
    pub fn matches_renewal_window(&self, cutoff: NaiveDate) -> bool {
        self.status.is_renewable()
            && !self.cancel_at_period_end
            && self.is_linked()
            && self.is_due(cutoff)
    }

    /// Record the outcome of a reconciliation attempt, replacing the previous one
    pub fn mark_reconciled(
        &mut self,
        status: ReconciliationStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.reconciliation_status = status;
        self.reconciliation_error = error;
        self.last_reconciled_at = Some(at);
    }
}
