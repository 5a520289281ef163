use async_trait::async_trait;
use billing_mirror_types::ExternalSnapshot;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::{BillingProvider, ProviderCredential, ProviderError};

/// Scripted billing provider for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MockBillingProvider {
    snapshots: Arc<RwLock<HashMap<String, ExternalSnapshot>>>,
    failures: Arc<RwLock<HashMap<String, ProviderError>>>,
    panics: Arc<RwLock<HashSet<String>>>,
    calls: Arc<RwLock<Vec<(String, String)>>>,
    delay: Option<Duration>,
}

impl MockBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Serve this snapshot for its external identifier
    pub async fn insert(&self, snapshot: ExternalSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.external_subscription_id.clone(), snapshot);
    }

    /// Fail every call for this external identifier
    pub async fn fail_with(&self, external_id: impl Into<String>, error: ProviderError) {
        self.failures.write().await.insert(external_id.into(), error);
    }

    /// Panic while answering this external identifier
    pub async fn panic_on(&self, external_id: impl Into<String>) {
        self.panics.write().await.insert(external_id.into());
    }

    /// (credential secret, external id) of every call so far
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.read().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl BillingProvider for MockBillingProvider {
    async fn fetch_subscription(
        &self,
        credential: &ProviderCredential,
        external_id: &str,
    ) -> Result<ExternalSnapshot, ProviderError> {
        self.calls
            .write()
            .await
            .push((credential.secret().to_string(), external_id.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.panics.read().await.contains(external_id) {
            panic!("mock provider panicked on {external_id}");
        }

        if let Some(error) = self.failures.read().await.get(external_id) {
            return Err(error.clone());
        }

        self.snapshots
            .read()
            .await
            .get(external_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(external_id.to_string()))
    }
}
