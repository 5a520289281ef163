use billing_mirror_provider::ProviderError;
use billing_mirror_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("invalid provider snapshot for {external_id}: {reason}")]
    InvalidSnapshot { external_id: String, reason: String },

    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    #[error("job {job_name} already running as execution {execution_id}")]
    AlreadyRunning { job_name: String, execution_id: i64 },

    #[error("tenant registry unavailable: {0}")]
    Registry(String),

    #[error("processing panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    /// Render a caught panic payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        ReconcileError::Panicked(message)
    }
}
