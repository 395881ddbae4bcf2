//! Persistence collaborator: the trait the engine writes through, and an
//! in-memory implementation for tests and embedding.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Result, SchedulerError};
use crate::types::{ExecutionLog, Job, JobFilter, JobPatch, LogFinalize};

/// Durable storage for jobs and their execution logs.
///
/// Every method is atomic per record. Read-modify-write races across
/// separate calls are the caller's concern.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Point lookup; `None` if the job does not exist.
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Insert or fully replace a job.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Apply `patch` to job `id` and return the stored result.
    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job>;

    async fn create_log(&self, log: &ExecutionLog) -> Result<()>;

    /// Finalize a `running` log exactly once.
    ///
    /// Returns `AlreadyFinalized` if the log has left the `running` state.
    async fn finalize_log(&self, id: &str, fin: &LogFinalize) -> Result<ExecutionLog>;

    /// Jobs matching `filter`, ordered by creation time.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Most recent logs of `job_id`, newest first.
    async fn list_logs(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionLog>>;
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<String, Job>,
    logs: HashMap<String, ExecutionLog>,
}

/// `JobStore` backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.tables.read().await.jobs.get(id).cloned())
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.tables
            .write()
            .await
            .jobs
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job> {
        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        patch.apply_to(job, Utc::now());
        Ok(job.clone())
    }

    async fn create_log(&self, log: &ExecutionLog) -> Result<()> {
        self.tables
            .write()
            .await
            .logs
            .insert(log.id.clone(), log.clone());
        Ok(())
    }

    async fn finalize_log(&self, id: &str, fin: &LogFinalize) -> Result<ExecutionLog> {
        let mut tables = self.tables.write().await;
        let log = tables
            .logs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::LogNotFound { id: id.to_string() })?;
        if log.is_finalized() {
            return Err(SchedulerError::AlreadyFinalized { id: id.to_string() });
        }
        *log = log.finalized(fin);
        Ok(log.clone())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<Job> = tables
            .jobs
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    async fn list_logs(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionLog>> {
        let tables = self.tables.read().await;
        let mut logs: Vec<ExecutionLog> = tables
            .logs
            .values()
            .filter(|l| l.job_id == job_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        logs.truncate(limit);
        Ok(logs)
    }
}
