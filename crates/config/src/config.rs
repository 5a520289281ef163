//! Configuration structures for the subscription billing mirror

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local mirror database
    pub database: DatabaseConfig,

    /// Reconciliation job tuning
    pub reconciliation: ReconciliationConfig,

    /// Billing provider client and per-tenant credentials
    pub provider: ProviderConfig,

    /// Tenants visited by multi-tenant runs. Empty means every tenant
    /// found in the subscription store.
    pub tenants: Vec<String>,

    /// In-process scheduled trigger
    pub scheduler: SchedulerConfig,

    /// HTTP surface
    pub server: ServerConfig,

    /// Log output
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://billing-mirror.db` or `sqlite::memory:`
    pub url: String,
}

/// Reconciliation job configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Days ahead of today that count as due for renewal
    pub horizon_days: u32,

    /// Act on the local period end when the provider disagrees
    pub allow_local_fallback: bool,

    /// Records per transaction
    pub chunk_size: usize,

    /// Upper bound on records selected per run
    pub max_records: usize,

    /// Pause between tenants in milliseconds
    pub inter_tenant_delay_ms: u64,

    /// Overall budget for one provider lookup in milliseconds
    pub provider_timeout_ms: u64,

    /// Name executions are audited under
    pub job_name: String,

    /// Seconds after which a RUNNING execution stops blocking new runs
    pub run_stale_after_secs: i64,
}

impl ReconciliationConfig {
    pub fn inter_tenant_delay(&self) -> Duration {
        Duration::from_millis(self.inter_tenant_delay_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }
}

/// Billing provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the Stripe-compatible API
    pub base_url: String,

    /// HTTP request timeout in milliseconds
    pub timeout_ms: u64,

    /// Decrypted API secret by tenant id
    pub credentials: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Scheduled trigger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    /// Six-field cron expression (seconds first), evaluated in UTC
    pub cron: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,

    /// `pretty` or `json`
    pub format: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://billing-mirror.db".to_string(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            horizon_days: 7,
            allow_local_fallback: false,
            chunk_size: 100,
            max_records: 1000,
            inter_tenant_delay_ms: 1000,
            provider_timeout_ms: 10_000,
            job_name: "renewal-reconciliation".to_string(),
            run_stale_after_secs: 2 * 60 * 60,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.stripe.com".to_string(),
            timeout_ms: 10_000,
            credentials: BTreeMap::new(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // 02:00 UTC daily
            cron: "0 0 2 * * *".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
