use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next fire.
    Idle,
    /// An execution is in flight.
    Running,
    /// Last execution succeeded.
    Success,
    /// Last execution failed.
    Failed,
    /// Explicitly paused; no timer is armed.
    Paused,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(JobStatus::Idle),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "paused" => Ok(JobStatus::Paused),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Which clock frame a job's schedule is evaluated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimezonePolicy {
    /// When false the schedule is evaluated in UTC and `timezone` is ignored.
    #[serde(default)]
    pub use_local_time: bool,
    /// IANA name, e.g. `Europe/Berlin`. Empty means the configured default.
    #[serde(default)]
    pub timezone: String,
}

impl TimezonePolicy {
    pub fn utc() -> Self {
        Self {
            use_local_time: false,
            timezone: String::new(),
        }
    }

    pub fn local(timezone: impl Into<String>) -> Self {
        Self {
            use_local_time: true,
            timezone: timezone.into(),
        }
    }
}

impl Default for TimezonePolicy {
    fn default() -> Self {
        Self::utc()
    }
}

/// HTTP request performed when a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAction {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Overrides the invoker's default request timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl JobAction {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout_secs: None,
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// UUID v7 string, primary key.
    pub id: String,
    pub name: String,
    /// Interval in whole seconds (`"300"`) or a cron expression.
    pub schedule_spec: String,
    pub action: JobAction,
    pub timezone_policy: TimezonePolicy,
    pub status: JobStatus,
    /// Start of the most recent execution.
    pub last_run: Option<DateTime<Utc>>,
    /// Next armed fire instant.
    pub next_run: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub fail_count: u64,
    /// Mean duration over every finalized execution, failures included.
    pub average_runtime_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Build a fresh `idle` job with zeroed counters.
    pub fn new(
        name: impl Into<String>,
        schedule_spec: impl Into<String>,
        action: JobAction,
        timezone_policy: TimezonePolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            schedule_spec: schedule_spec.into(),
            action,
            timezone_policy,
            status: JobStatus::Idle,
            last_run: None,
            next_run: None,
            success_count: 0,
            fail_count: 0,
            average_runtime_secs: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How a patch changes `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Overwrite unconditionally.
    Set(JobStatus),
    /// Overwrite unless the stored status is `paused`; evaluated atomically by the store.
    UnlessPaused(JobStatus),
}

/// Partial update applied atomically to one job record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<StatusChange>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub success_count: Option<u64>,
    pub fail_count: Option<u64>,
    pub average_runtime_secs: Option<f64>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(StatusChange::Set(status)),
            ..Self::default()
        }
    }

    pub fn with_last_run(mut self, at: DateTime<Utc>) -> Self {
        self.last_run = Some(at);
        self
    }

    pub fn with_next_run(mut self, at: DateTime<Utc>) -> Self {
        self.next_run = Some(at);
        self
    }

    /// Patch carrying the counters of `job` plus a status that yields to a concurrent pause.
    pub fn outcome_of(job: &Job) -> Self {
        Self {
            status: Some(StatusChange::UnlessPaused(job.status)),
            success_count: Some(job.success_count),
            fail_count: Some(job.fail_count),
            average_runtime_secs: job.average_runtime_secs,
            ..Self::default()
        }
    }

    /// Apply to an in-memory record, stamping `updated_at`.
    pub fn apply_to(&self, job: &mut Job, now: DateTime<Utc>) {
        match self.status {
            Some(StatusChange::Set(s)) => job.status = s,
            Some(StatusChange::UnlessPaused(s)) if job.status != JobStatus::Paused => {
                job.status = s
            }
            _ => {}
        }
        if let Some(at) = self.last_run {
            job.last_run = Some(at);
        }
        if let Some(at) = self.next_run {
            job.next_run = Some(at);
        }
        if let Some(n) = self.success_count {
            job.success_count = n;
        }
        if let Some(n) = self.fail_count {
            job.fail_count = n;
        }
        if let Some(avg) = self.average_runtime_secs {
            job.average_runtime_secs = Some(avg);
        }
        job.updated_at = now;
    }
}

/// Selection criteria for `JobStore::list_jobs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    /// Only jobs in exactly this status.
    pub status: Option<JobStatus>,
    /// Skip jobs whose status is `paused`.
    pub exclude_paused: bool,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Every job that startup recovery should arm.
    pub fn schedulable() -> Self {
        Self {
            status: None,
            exclude_paused: true,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        if self.exclude_paused && job.status == JobStatus::Paused {
            return false;
        }
        self.status.map_or(true, |s| job.status == s)
    }
}

/// State of a single execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogStatus::Running => "running",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(LogStatus::Running),
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Record of one firing. Immutable once finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub job_id: String,
    pub status: LogStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionLog {
    /// A fresh `running` record for `job_id`.
    pub fn started(job_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_id: job_id.into(),
            status: LogStatus::Running,
            start_time,
            end_time: None,
            duration_secs: None,
            output: String::new(),
            error: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != LogStatus::Running
    }

    /// Copy of this record with `fin` applied.
    pub fn finalized(&self, fin: &LogFinalize) -> Self {
        Self {
            status: fin.status,
            end_time: Some(fin.end_time),
            duration_secs: Some(fin.duration_secs),
            output: fin.output.clone(),
            error: fin.error.clone(),
            ..self.clone()
        }
    }
}

/// Fields written once when an execution completes.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFinalize {
    pub status: LogStatus,
    pub end_time: DateTime<Utc>,
    pub duration_secs: f64,
    pub output: String,
    pub error: Option<String>,
}
