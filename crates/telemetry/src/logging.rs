use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset and no level is configured
pub const DEFAULT_FILTER: &str = "info,billing_mirror=debug";

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(TracingError::InvalidFormat(other.to_string())),
        }
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `level`; `level` wins over [`DEFAULT_FILTER`].
pub fn init_tracing(level: Option<&str>, format: LogFormat) -> Result<(), TracingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| match level {
            Some(level) => EnvFilter::try_new(level),
            None => EnvFilter::try_new(DEFAULT_FILTER),
        })
        .map_err(|e| TracingError::InvalidFilter(e.to_string()))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_target(true).with_level(true).json())
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init(),
    }
    .map_err(|e| TracingError::InitError(e.to_string()))
}

/// Correlation span for one pipeline execution
#[derive(Debug, Clone)]
pub struct RunSpan {
    pub correlation_id: uuid::Uuid,
    pub job_name: String,
    pub tenant_id: Option<String>,
}

impl RunSpan {
    pub fn new(job_name: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4(),
            job_name: job_name.into(),
            tenant_id,
        }
    }

    /// Span to instrument the execution future with
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "execution",
            correlation_id = %self.correlation_id,
            job = %self.job_name,
            tenant_id = self.tenant_id.as_deref().unwrap_or("*"),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing initialization error: {0}")]
    InitError(String),

    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("unknown log format: {0}")]
    InvalidFormat(String),
}
