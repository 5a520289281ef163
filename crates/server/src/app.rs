//! Wiring from configuration to a ready-to-run job

use anyhow::Context;
use billing_mirror_config::AppConfig;
use billing_mirror_provider::{HttpBillingProvider, ProviderGateway, StaticCredentialStore};
use billing_mirror_reconciler::{
    OrchestratorConfig, ReconciliationPolicy, RenewalReconciliationJob,
    RenewalReconciliationJobBuilder, RunLimits, StaticTenantRegistry,
};
use billing_mirror_store::SqliteStore;
use std::sync::Arc;
use tracing::info;

/// Job builder carrying every tunable from the configuration.
///
/// Stores and gateway are left to the caller.
pub fn job_builder(config: &AppConfig) -> RenewalReconciliationJobBuilder {
    let reconciliation = &config.reconciliation;

    let mut builder = RenewalReconciliationJob::builder()
        .with_policy(ReconciliationPolicy {
            horizon_days: reconciliation.horizon_days,
            allow_local_fallback: reconciliation.allow_local_fallback,
        })
        .with_limits(RunLimits {
            chunk_size: reconciliation.chunk_size,
            max_records: reconciliation.max_records,
        })
        .with_orchestrator_config(OrchestratorConfig {
            inter_tenant_delay: reconciliation.inter_tenant_delay(),
        })
        .with_job_name(reconciliation.job_name.clone())
        .with_stale_after(chrono::Duration::seconds(reconciliation.run_stale_after_secs));

    // Otherwise tenants are discovered from the store
    if !config.tenants.is_empty() {
        builder = builder.with_registry(Arc::new(StaticTenantRegistry::new(config.tenants.clone())));
    }

    builder
}

/// Gateway to the configured billing provider
pub fn provider_gateway(config: &AppConfig) -> anyhow::Result<ProviderGateway> {
    let provider = HttpBillingProvider::new(config.provider.base_url.clone(), config.provider.timeout())
        .context("building billing provider client")?;
    let credentials: StaticCredentialStore = config
        .provider
        .credentials
        .iter()
        .map(|(tenant, secret)| (tenant.clone(), secret.clone()))
        .collect();

    info!(
        base_url = %config.provider.base_url,
        tenants_with_credentials = credentials.len(),
        "billing provider configured"
    );

    Ok(ProviderGateway::new(Arc::new(provider), Arc::new(credentials))
        .with_timeout(config.reconciliation.provider_timeout()))
}

/// Open the database and build the job
pub async fn build_job(config: &AppConfig) -> anyhow::Result<RenewalReconciliationJob> {
    let store = SqliteStore::connect(&config.database.url)
        .await
        .with_context(|| format!("opening database {}", config.database.url))?;
    info!(url = %config.database.url, "database ready");

    let job = job_builder(config)
        .with_store(Arc::new(store))
        .with_gateway(provider_gateway(config)?)
        .build()?;
    Ok(job)
}
