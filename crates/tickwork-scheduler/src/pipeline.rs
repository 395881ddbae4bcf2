use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::invoker::ActionInvoker;
use crate::stats::{self, Outcome};
use crate::store::JobStore;
use crate::types::{
    ExecutionLog, Job, JobAction, JobPatch, JobStatus, LogFinalize, LogStatus, StatusChange,
};

/// Runs one firing of a job from start to finalized record.
pub struct ExecutionPipeline {
    store: Arc<dyn JobStore>,
    invoker: Arc<dyn ActionInvoker>,
    clock: Arc<dyn Clock>,
}

impl ExecutionPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        invoker: Arc<dyn ActionInvoker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            invoker,
            clock,
        }
    }

    /// Execute `job` once and return the stored job and finalized log.
    ///
    /// Action failures are recorded, never returned. An `Err` here always
    /// means the store rejected a write.
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub async fn execute(&self, job: &Job) -> Result<(Job, ExecutionLog)> {
        let start = self.clock.now();
        let log = ExecutionLog::started(&job.id, start);
        let mark_running = JobPatch {
            status: Some(StatusChange::UnlessPaused(JobStatus::Running)),
            ..JobPatch::default()
        }
        .with_last_run(start);

        // Log first: a job is never marked running without a record to finalize.
        self.store.create_log(&log).await?;
        let running = match self.store.update(&job.id, &mark_running).await {
            Ok(job) => job,
            Err(e) => {
                self.abandon(&log, &e).await;
                return Err(e);
            }
        };
        info!(log_id = %log.id, "execution started");

        let result = self.invoke(&job.action).await;

        let end = self.clock.now();
        let duration_secs = (end - start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        let (fin, outcome, status) = match result {
            Ok(output) => (
                LogFinalize {
                    status: LogStatus::Success,
                    end_time: end,
                    duration_secs,
                    output,
                    error: None,
                },
                Outcome::success(duration_secs),
                JobStatus::Success,
            ),
            Err(message) => {
                warn!(error = %message, duration_secs, "action failed");
                (
                    LogFinalize {
                        status: LogStatus::Failed,
                        end_time: end,
                        duration_secs,
                        output: String::new(),
                        error: Some(message),
                    },
                    Outcome::failed(duration_secs),
                    JobStatus::Failed,
                )
            }
        };

        let mut folded = stats::apply_outcome(&running, outcome);
        folded.status = status;

        let outcome_patch = JobPatch::outcome_of(&folded);
        let (finalized, updated) = tokio::join!(
            self.store.finalize_log(&log.id, &fin),
            self.store.update(&job.id, &outcome_patch)
        );
        let finalized = finalized?;
        let updated = updated?;

        info!(
            log_id = %finalized.id,
            status = %finalized.status,
            duration_secs,
            "execution finalized"
        );
        Ok((updated, finalized))
    }

    /// Close `log` as failed when the run cannot start, so no record is left
    /// `running`.
    async fn abandon(&self, log: &ExecutionLog, cause: &SchedulerError) {
        let fin = LogFinalize {
            status: LogStatus::Failed,
            end_time: self.clock.now(),
            duration_secs: 0.0,
            output: String::new(),
            error: Some(cause.to_string()),
        };
        if let Err(e) = self.store.finalize_log(&log.id, &fin).await {
            warn!(log_id = %log.id, error = %e, "could not close abandoned execution log");
        }
    }

    /// Invoke on a separate task so a panicking invoker becomes a failure.
    async fn invoke(&self, action: &JobAction) -> std::result::Result<String, String> {
        let invoker = Arc::clone(&self.invoker);
        let action = action.clone();
        match tokio::spawn(async move { invoker.invoke(&action).await }).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_err) => Err(format!("action invoker panicked: {join_err}")),
        }
    }
}
