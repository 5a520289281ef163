//! Cron trigger for the reconciliation job

use anyhow::Context;
use billing_mirror_config::SchedulerConfig;
use billing_mirror_reconciler::RenewalReconciliationJob;
use billing_mirror_types::{RunRequest, TriggerSource};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// Scheduler firing a multi-tenant run on the configured cron, or `None` when disabled.
///
/// The returned scheduler is not started.
pub async fn build_scheduler(
    job: Arc<RenewalReconciliationJob>,
    config: &SchedulerConfig,
) -> anyhow::Result<Option<JobScheduler>> {
    if !config.enabled {
        info!("scheduled reconciliation disabled");
        return Ok(None);
    }

    let scheduler = JobScheduler::new().await.context("creating scheduler")?;
    let scheduled = Job::new_async(config.cron.as_str(), move |_uuid, _lock| {
        let job = job.clone();
        Box::pin(async move {
            let response = job
                .trigger(RunRequest::default(), TriggerSource::Scheduled)
                .await;
            if response.success {
                info!(
                    execution_id = ?response.execution_id,
                    processed = response.processed_count,
                    failed = response.failed_count,
                    "scheduled reconciliation finished"
                );
            } else {
                warn!(message = %response.message, "scheduled reconciliation did not start");
            }
        })
    })
    .with_context(|| format!("creating scheduled job for cron {}", config.cron))?;

    scheduler
        .add(scheduled)
        .await
        .context("adding scheduled job")?;
    info!(cron = %config.cron, "scheduled reconciliation registered");

    Ok(Some(scheduler))
}
