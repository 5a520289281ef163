use billing_mirror_types::ExternalSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{BillingProvider, CredentialStore, ProviderError};

/// Default bound on a single provider call
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Credential resolution plus a time-bounded provider call
#[derive(Clone)]
pub struct ProviderGateway {
    provider: Arc<dyn BillingProvider>,
    credentials: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn BillingProvider>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider,
            credentials,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch the live snapshot for a tenant's subscription
    pub async fn fetch(
        &self,
        tenant_id: &str,
        external_id: &str,
    ) -> Result<ExternalSnapshot, ProviderError> {
        let credential = self
            .credentials
            .resolve(tenant_id)
            .await?
            .ok_or_else(|| ProviderError::ConfigurationMissing {
                tenant_id: tenant_id.to_string(),
            })?;

        debug!(tenant_id, external_subscription_id = external_id, "querying billing provider");

        match tokio::time::timeout(
            self.timeout,
            self.provider.fetch_subscription(&credential, external_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                millis: self.timeout.as_millis() as u64,
            }),
        }
    }
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MockBillingProvider, StaticCredentialStore};
    use billing_mirror_types::SubscriptionStatus;
    use chrono::NaiveDate;

    fn snapshot(id: &str) -> ExternalSnapshot {
        let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        ExternalSnapshot::new(id, SubscriptionStatus::Active, start, end)
    }

    #[tokio::test]
    async fn test_missing_credential_is_configuration_error() {
        let provider = Arc::new(MockBillingProvider::new());
        provider.insert(snapshot("sub_1")).await;
        let gateway = ProviderGateway::new(provider.clone(), Arc::new(StaticCredentialStore::new()));

        let result = gateway.fetch("t1", "sub_1").await;

        assert!(matches!(result, Err(ProviderError::ConfigurationMissing { .. })));
        assert_eq!(provider.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_fetch_uses_tenant_credential() {
        let provider = Arc::new(MockBillingProvider::new());
        provider.insert(snapshot("sub_1")).await;
        let credentials = StaticCredentialStore::new().with_credential("t1", "sk_t1");
        let gateway = ProviderGateway::new(provider.clone(), Arc::new(credentials));

        let fetched = gateway.fetch("t1", "sub_1").await.unwrap();

        assert_eq!(fetched, snapshot("sub_1"));
        assert_eq!(provider.calls().await, vec![("sk_t1".to_string(), "sub_1".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(MockBillingProvider::new().with_delay(Duration::from_secs(30)));
        provider.insert(snapshot("sub_1")).await;
        let credentials = StaticCredentialStore::new().with_credential("t1", "sk_t1");
        let gateway = ProviderGateway::new(provider, Arc::new(credentials))
            .with_timeout(Duration::from_secs(10));

        let result = gateway.fetch("t1", "sub_1").await;

        assert_eq!(result, Err(ProviderError::Timeout { millis: 10_000 }));
    }
}
