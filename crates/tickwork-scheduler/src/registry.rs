use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::pipeline::ExecutionPipeline;
use crate::schedule::ScheduleCalculator;
use crate::store::JobStore;
use crate::types::{Job, JobPatch, JobStatus};

/// The live timer chain of one job.
struct TimerHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TimerHandle {
    fn is_armed(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

/// Holds at most one timer chain per job id and drives
/// fire → execute → re-arm for each of them.
///
/// Cloning is cheap; clones share the same handle map.
#[derive(Clone)]
pub struct TimerRegistry {
    store: Arc<dyn JobStore>,
    pipeline: Arc<ExecutionPipeline>,
    clock: Arc<dyn Clock>,
    calculator: Arc<ScheduleCalculator>,
    timers: Arc<DashMap<String, TimerHandle>>,
    generations: Arc<AtomicU64>,
}

impl TimerRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        pipeline: Arc<ExecutionPipeline>,
        clock: Arc<dyn Clock>,
        calculator: ScheduleCalculator,
    ) -> Self {
        Self {
            store,
            pipeline,
            clock,
            calculator: Arc::new(calculator),
            timers: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arm `job` for its next fire after now, replacing any existing chain.
    ///
    /// Persists `next_run` before arming. A replaced chain is cancelled; if it
    /// is mid-execution the new chain waits for that execution to finish.
    pub async fn schedule(&self, job: &Job) -> Result<DateTime<Utc>> {
        let next = self.calculator.next_fire_or_fallback(
            &job.schedule_spec,
            &job.timezone_policy,
            self.clock.now(),
        );
        self.store
            .update(&job.id, &JobPatch::default().with_next_run(next))
            .await?;
        self.arm(&job.id, next);
        info!(job_id = %job.id, next_run = %next, "job scheduled");
        Ok(next)
    }

    /// Stop future fires of `job_id`. An in-flight execution runs to completion.
    ///
    /// Returns whether an armed timer was cancelled.
    pub fn cancel(&self, job_id: &str) -> bool {
        let Some(handle) = self.timers.get(job_id) else {
            return false;
        };
        let was_armed = handle.is_armed();
        handle.cancel.cancel();
        if was_armed {
            debug!(job_id = %job_id, "timer cancelled");
        }
        was_armed
    }

    /// Cancel, then persist `paused`. Pausing a paused job only re-cancels.
    pub async fn pause(&self, job_id: &str) -> Result<()> {
        self.cancel(job_id);
        let job = self.get_job(job_id).await?;
        if job.status == JobStatus::Paused {
            debug!(job_id = %job_id, "already paused");
            return Ok(());
        }
        self.store
            .update(job_id, &JobPatch::status(JobStatus::Paused))
            .await?;
        info!(job_id = %job_id, "job paused");
        Ok(())
    }

    /// Move a paused job to `idle` and schedule it.
    ///
    /// Returns the new `next_run`, or `None` when the job was not paused.
    pub async fn resume(&self, job_id: &str) -> Result<Option<DateTime<Utc>>> {
        let job = self.get_job(job_id).await?;
        if job.status != JobStatus::Paused {
            debug!(job_id = %job_id, status = %job.status, "resume ignored, job not paused");
            return Ok(None);
        }
        let job = self
            .store
            .update(job_id, &JobPatch::status(JobStatus::Idle))
            .await?;
        info!(job_id = %job_id, "job resumed");
        self.schedule(&job).await.map(Some)
    }

    /// True while `job_id` has an armed (not cancelled) timer.
    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.timers.get(job_id).is_some_and(|h| h.is_armed())
    }

    /// Number of armed timers.
    pub fn timer_count(&self) -> usize {
        self.timers.iter().filter(|h| h.is_armed()).count()
    }

    /// Cancel every chain and wait for in-flight executions to finish.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        let mut drained = 0usize;
        for id in ids {
            if let Some((_, handle)) = self.timers.remove(&id) {
                handle.cancel.cancel();
                if let Err(e) = handle.task.await {
                    warn!(job_id = %id, error = %e, "timer task ended abnormally");
                }
                drained += 1;
            }
        }
        info!(chains = drained, "timer registry drained");
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    fn arm(&self, job_id: &str, first_fire: DateTime<Utc>) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (predecessor_tx, predecessor_rx) = oneshot::channel();

        let task = tokio::spawn(self.clone().run_chain(
            job_id.to_string(),
            first_fire,
            generation,
            cancel.clone(),
            predecessor_rx,
        ));

        // `insert` swaps atomically, so concurrent schedules of one id each
        // displace exactly one predecessor.
        let displaced = self.timers.insert(
            job_id.to_string(),
            TimerHandle {
                generation,
                cancel,
                task,
            },
        );
        let predecessor = displaced.map(|old| {
            old.cancel.cancel();
            old.task
        });
        let _ = predecessor_tx.send(predecessor);
    }

    /// One job's fire → execute → re-arm loop.
    async fn run_chain(
        self,
        job_id: String,
        mut next_fire: DateTime<Utc>,
        generation: u64,
        cancel: CancellationToken,
        predecessor: oneshot::Receiver<Option<JoinHandle<()>>>,
    ) {
        if let Ok(Some(previous)) = predecessor.await {
            // Keeps executions of one job strictly sequential across replacement.
            let _ = previous.await;
        }

        loop {
            let delay = (next_fire - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if cancel.is_cancelled() {
                break;
            }

            match self.store.get(&job_id).await {
                Ok(Some(job)) if job.status == JobStatus::Paused => {
                    debug!(job_id = %job_id, "job paused before fire");
                    break;
                }
                Ok(Some(job)) => {
                    if let Err(e) = self.pipeline.execute(&job).await {
                        error!(job_id = %job_id, error = %e, "execution could not be recorded");
                    }
                }
                Ok(None) => {
                    info!(job_id = %job_id, "job no longer exists, chain stopped");
                    break;
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "could not load job at fire time");
                }
            }

            match self.rearm(&job_id, &cancel).await {
                Ok(Some(next)) => {
                    debug!(job_id = %job_id, next_run = %next, "re-armed");
                    next_fire = next;
                }
                Ok(None) => break,
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "re-arm failed, chain stalled");
                    break;
                }
            }
        }

        self.timers
            .remove_if(&job_id, |_, handle| handle.generation == generation);
    }

    /// Decide whether the chain continues and persist its next fire.
    ///
    /// The status is re-read here so a pause that landed during the
    /// execution is honoured.
    async fn rearm(&self, job_id: &str, cancel: &CancellationToken) -> Result<Option<DateTime<Utc>>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let Some(job) = self.store.get(job_id).await? else {
            return Ok(None);
        };
        if job.status == JobStatus::Paused {
            info!(job_id = %job_id, "job paused, not re-arming");
            return Ok(None);
        }
        let next = self.calculator.next_fire_or_fallback(
            &job.schedule_spec,
            &job.timezone_policy,
            self.clock.now(),
        );
        self.store
            .update(job_id, &JobPatch::default().with_next_run(next))
            .await?;
        Ok(Some(next))
    }
}
