use serde::{Deserialize, Serialize};

use crate::TenantId;

/// Request accepted by the reconciliation trigger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub tenant_id: Option<TenantId>,
    pub batch_size: Option<usize>,
    pub max_records: Option<usize>,
    pub external_subscription_id: Option<String>,
}

impl RunRequest {
    pub fn for_tenant(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn with_external_subscription(mut self, external_id: impl Into<String>) -> Self {
        self.external_subscription_id = Some(external_id.into());
        self
    }
}

/// Response returned by the reconciliation trigger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub success: bool,
    pub message: String,
    pub execution_id: Option<i64>,
    pub processed_count: u64,
    pub success_count: u64,
    pub failed_count: u64,
    pub duration_ms: i64,
}

impl RunResponse {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}
