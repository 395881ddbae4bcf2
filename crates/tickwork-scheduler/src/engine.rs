use std::sync::Arc;

use chrono::{DateTime, Utc};
use tickwork_core::config::SchedulerConfig;
use tokio::sync::watch;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::invoker::ActionInvoker;
use crate::pipeline::ExecutionPipeline;
use crate::registry::TimerRegistry;
use crate::schedule::ScheduleCalculator;
use crate::store::JobStore;
use crate::types::{JobFilter, JobStatus};

/// Entry point for callers outside the scheduler: startup recovery plus
/// pause / resume / cancel.
///
/// Construct once per process and share it (e.g. behind an `Arc`).
pub struct SchedulerEngine {
    store: Arc<dyn JobStore>,
    registry: TimerRegistry,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        invoker: Arc<dyn ActionInvoker>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        let pipeline = Arc::new(ExecutionPipeline::new(
            Arc::clone(&store),
            invoker,
            Arc::clone(&clock),
        ));
        let calculator =
            ScheduleCalculator::new(config.fallback_interval_secs, &config.default_timezone);
        let registry = TimerRegistry::new(Arc::clone(&store), pipeline, clock, calculator);
        Self { store, registry }
    }

    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    /// Arm every job that is not paused. Call once at process start.
    ///
    /// A job that cannot be armed is logged and skipped; returns how many
    /// were armed.
    pub async fn schedule_all(&self) -> Result<usize> {
        let jobs = self.store.list_jobs(&JobFilter::schedulable()).await?;
        let total = jobs.len();
        let mut armed = 0usize;
        for job in jobs {
            match self.registry.schedule(&job).await {
                Ok(_) => armed += 1,
                Err(e) => error!(job_id = %job.id, error = %e, "could not schedule job"),
            }
        }
        info!(armed, total, "startup recovery complete");
        Ok(armed)
    }

    /// Arm a single job, e.g. right after it was created.
    ///
    /// Paused jobs stay unarmed; returns the new `next_run` otherwise.
    pub async fn schedule_job(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if job.status == JobStatus::Paused {
            return Ok(None);
        }
        self.registry.schedule(&job).await.map(Some)
    }

    pub async fn pause_job(&self, job_id: &str) -> Result<()> {
        self.registry.pause(job_id).await
    }

    pub async fn resume_job(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.registry.resume(job_id).await
    }

    /// Stop future fires without touching the persisted status.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.registry.cancel(job_id)
    }

    /// Recover schedules, then run until `shutdown` broadcasts `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("scheduler engine started");
        self.schedule_all().await?;

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("scheduler engine shutting down");
        self.registry.shutdown().await;
        Ok(())
    }
}
