//! Cron-driven background jobs with timeouts, run windows and persisted run records.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use flashfood_core::{JobRunRecord, JobStatus};
use flashfood_storage::{
    CatalogStore, JobRunRepository, NotificationRepository, UserSettingsRepository,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cleaning::DataCleaningService;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, TimeWindow};
use crate::notify::NotificationService;

pub const PROMOTE_JOB: &str = "promote-candidates";
pub const TRENDS_JOB: &str = "record-trends";
pub const PRICE_CHECK_JOB: &str = "price-check";

#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;
    /// Returns the number of items the run touched.
    async fn run(&self) -> Result<u64>;
}

pub struct PromoteJob(pub Arc<DataCleaningService>);

#[async_trait]
impl ScheduledJob for PromoteJob {
    fn name(&self) -> &'static str {
        PROMOTE_JOB
    }

    async fn run(&self) -> Result<u64> {
        let promoted = self.0.promote_candidates().await?;
        Ok(promoted.values().map(|v| v.len() as u64).sum())
    }
}

pub struct TrendsJob(pub Arc<DataCleaningService>);

#[async_trait]
impl ScheduledJob for TrendsJob {
    fn name(&self) -> &'static str {
        TRENDS_JOB
    }

    async fn run(&self) -> Result<u64> {
        Ok(self.0.record_daily_trends().await? as u64)
    }
}

pub struct PriceCheckJob<S>(pub Arc<NotificationService<S>>);

#[async_trait]
impl<S> ScheduledJob for PriceCheckJob<S>
where
    S: CatalogStore + NotificationRepository + UserSettingsRepository + 'static,
{
    fn name(&self) -> &'static str {
        PRICE_CHECK_JOB
    }

    async fn run(&self) -> Result<u64> {
        Ok(self.0.check_and_notify().await? as u64)
    }
}

/// Runs one job invocation under the configured timeout and window,
/// and persists its outcome.
pub struct JobRunner {
    runs: Arc<dyn JobRunRepository>,
    timeout: Duration,
    window: TimeWindow,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    pub fn new(runs: Arc<dyn JobRunRepository>, timeout: Duration, window: TimeWindow) -> Self {
        Self::with_clock(runs, timeout, window, Arc::new(SystemClock))
    }

    pub fn with_clock(
        runs: Arc<dyn JobRunRepository>,
        timeout: Duration,
        window: TimeWindow,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runs,
            timeout,
            window,
            clock,
        }
    }

    /// `None` when the current local time is outside the run window.
    pub async fn run(&self, job: &dyn ScheduledJob) -> Option<JobRunRecord> {
        let now = self.clock.now();
        if !self.window.contains(now.with_timezone(&Local).time()) {
            debug!(job = job.name(), "outside run window; skipped");
            return None;
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("job", job = job.name(), %run_id);
        async {
            let (status, item_count, error_message) =
                match tokio::time::timeout(self.timeout, job.run()).await {
                    Ok(Ok(items)) => {
                        info!(items, "job finished");
                        (JobStatus::Success, items, None)
                    }
                    Ok(Err(err)) => {
                        let message = format!("{err:#}");
                        error!(error = %message, "job failed");
                        (JobStatus::Failed, 0, Some(message))
                    }
                    Err(_) => {
                        let message = format!("timed out after {}s", self.timeout.as_secs_f64());
                        error!(error = %message, "job failed");
                        (JobStatus::Failed, 0, Some(message))
                    }
                };

            let record = JobRunRecord {
                job_name: job.name().to_string(),
                run_id: run_id.to_string(),
                run_time: now,
                status,
                item_count,
                error_message,
            };
            if let Err(err) = self.runs.record_job_run(&record).await {
                warn!(error = %err, "failed to persist job run");
            }
            Some(record)
        }
        .instrument(span)
        .await
    }
}

/// Pairs each job with its cron expression from the environment config.
pub fn schedule_from_config<S>(
    config: &AppConfig,
    cleaning: Arc<DataCleaningService>,
    notifications: Arc<NotificationService<S>>,
) -> Vec<(String, Arc<dyn ScheduledJob>)>
where
    S: CatalogStore + NotificationRepository + UserSettingsRepository + 'static,
{
    vec![
        (
            config.promote_cron.clone(),
            Arc::new(PromoteJob(cleaning.clone())) as Arc<dyn ScheduledJob>,
        ),
        (
            config.trends_cron.clone(),
            Arc::new(TrendsJob(cleaning)) as Arc<dyn ScheduledJob>,
        ),
        (
            config.price_check_cron.clone(),
            Arc::new(PriceCheckJob(notifications)) as Arc<dyn ScheduledJob>,
        ),
    ]
}

pub async fn build_scheduler(
    runner: Arc<JobRunner>,
    entries: Vec<(String, Arc<dyn ScheduledJob>)>,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for (cron, job) in entries {
        let name = job.name();
        let runner = runner.clone();
        let cron_job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let runner = runner.clone();
            let job = job.clone();
            Box::pin(async move {
                runner.run(job.as_ref()).await;
            })
        })
        .with_context(|| format!("creating scheduler job {name} for cron {cron}"))?;
        sched
            .add(cron_job)
            .await
            .with_context(|| format!("adding scheduler job {name}"))?;
        info!(job = name, cron = %cron, "job scheduled");
    }
    Ok(sched)
}
