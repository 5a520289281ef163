use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("billing provider unavailable: {0}")]
    Unavailable(String),

    #[error("no provider credential configured for tenant {tenant_id}")]
    ConfigurationMissing { tenant_id: String },

    #[error("billing provider call timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("subscription not found at provider: {0}")]
    NotFound(String),
}
