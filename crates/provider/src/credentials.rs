use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

use crate::ProviderError;

/// Decrypted API credential for one tenant's provider account
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    secret: String,
}

impl ProviderCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

// Never print the secret
impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of per-tenant provider credentials
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the tenant has no credential configured
    async fn resolve(&self, tenant_id: &str) -> Result<Option<ProviderCredential>, ProviderError>;
}

/// Credentials fixed at construction, typically loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    credentials: HashMap<String, ProviderCredential>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(mut self, tenant_id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials
            .insert(tenant_id.into(), ProviderCredential::new(secret));
        self
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl FromIterator<(String, String)> for StaticCredentialStore {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            credentials: iter
                .into_iter()
                // Blank secrets count as unconfigured
                .filter(|(_, secret)| !secret.trim().is_empty())
                .map(|(tenant, secret)| (tenant, ProviderCredential::new(secret)))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn resolve(&self, tenant_id: &str) -> Result<Option<ProviderCredential>, ProviderError> {
        Ok(self.credentials.get(tenant_id).cloned())
    }
}
