use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::store::JobStore;
use crate::types::{
    ExecutionLog, Job, JobAction, JobFilter, JobPatch, JobStatus, LogFinalize, LogStatus,
    TimezonePolicy,
};

const JOB_COLUMNS: &str = "id, name, schedule_spec, action, use_local_time, timezone, status,
     last_run, next_run, success_count, fail_count, average_runtime_secs,
     created_at, updated_at";

const LOG_COLUMNS: &str =
    "id, job_id, status, start_time, end_time, duration_secs, output, error";

/// `JobStore` persisted in SQLite.
///
/// Wraps a single connection in a `Mutex`; each trait call holds the lock for
/// its whole read-modify-write, which gives per-record atomicity.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let db = self.conn();
        select_job(&db, id)
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn save(&self, job: &Job) -> Result<()> {
        let db = self.conn();
        write_job(&db, job)?;
        debug!("job saved");
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: &str, patch: &JobPatch) -> Result<Job> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let mut job =
            select_job(&tx, id)?.ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        patch.apply_to(&mut job, Utc::now());
        write_job(&tx, &job)?;
        tx.commit()?;
        Ok(job)
    }

    #[instrument(skip(self, log), fields(log_id = %log.id, job_id = %log.job_id))]
    async fn create_log(&self, log: &ExecutionLog) -> Result<()> {
        let db = self.conn();
        db.execute(
            "INSERT INTO execution_logs
             (id, job_id, status, start_time, end_time, duration_secs, output, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                log.id,
                log.job_id,
                log.status.to_string(),
                ts(log.start_time),
                log.end_time.map(ts),
                log.duration_secs,
                log.output,
                log.error,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self, fin))]
    async fn finalize_log(&self, id: &str, fin: &LogFinalize) -> Result<ExecutionLog> {
        let db = self.conn();
        let n = db.execute(
            "UPDATE execution_logs
             SET status = ?1, end_time = ?2, duration_secs = ?3, output = ?4, error = ?5
             WHERE id = ?6 AND status = 'running'",
            rusqlite::params![
                fin.status.to_string(),
                ts(fin.end_time),
                fin.duration_secs,
                fin.output,
                fin.error,
                id,
            ],
        )?;
        let log = select_log(&db, id)?.ok_or_else(|| SchedulerError::LogNotFound { id: id.to_string() })?;
        if n == 0 {
            return Err(SchedulerError::AlreadyFinalized { id: id.to_string() });
        }
        Ok(log)
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at, id"
        ))?;
        let rows: Vec<JobRow> = stmt
            .query_map([], JobRow::from_row)?
            .collect::<rusqlite::Result<_>>()?;

        let jobs = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match row.into_job() {
                    Ok(job) => Some(job),
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "skipping undecodable job row");
                        None
                    }
                }
            })
            .filter(|job| filter.matches(job))
            .collect();
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn list_logs(&self, job_id: &str, limit: usize) -> Result<Vec<ExecutionLog>> {
        let db = self.conn();
        let mut stmt = db.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM execution_logs
             WHERE job_id = ?1
             ORDER BY start_time DESC
             LIMIT ?2"
        ))?;
        let rows: Vec<LogRow> = stmt
            .query_map(rusqlite::params![job_id, limit as i64], LogRow::from_row)?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(LogRow::into_log).collect()
    }
}

fn select_job(conn: &Connection, id: &str) -> Result<Option<Job>> {
    conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        [id],
        JobRow::from_row,
    )
    .optional()?
    .map(JobRow::into_job)
    .transpose()
}

fn select_log(conn: &Connection, id: &str) -> Result<Option<ExecutionLog>> {
    conn.query_row(
        &format!("SELECT {LOG_COLUMNS} FROM execution_logs WHERE id = ?1"),
        [id],
        LogRow::from_row,
    )
    .optional()?
    .map(LogRow::into_log)
    .transpose()
}

fn write_job(conn: &Connection, job: &Job) -> Result<()> {
    let action = serde_json::to_string(&job.action)
        .map_err(|e| SchedulerError::Corrupt(format!("action for {}: {e}", job.id)))?;
    conn.execute(
        "INSERT INTO jobs
         (id, name, schedule_spec, action, use_local_time, timezone, status,
          last_run, next_run, success_count, fail_count, average_runtime_secs,
          created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            schedule_spec = excluded.schedule_spec,
            action = excluded.action,
            use_local_time = excluded.use_local_time,
            timezone = excluded.timezone,
            status = excluded.status,
            last_run = excluded.last_run,
            next_run = excluded.next_run,
            success_count = excluded.success_count,
            fail_count = excluded.fail_count,
            average_runtime_secs = excluded.average_runtime_secs,
            updated_at = excluded.updated_at",
        rusqlite::params![
            job.id,
            job.name,
            job.schedule_spec,
            action,
            job.timezone_policy.use_local_time as i64,
            job.timezone_policy.timezone,
            job.status.to_string(),
            job.last_run.map(ts),
            job.next_run.map(ts),
            job.success_count as i64,
            job.fail_count as i64,
            job.average_runtime_secs,
            ts(job.created_at),
            ts(job.updated_at),
        ],
    )?;
    Ok(())
}

/// Fixed-width UTC timestamps so TEXT ordering matches time ordering.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Corrupt(format!("timestamp {s:?}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Raw column values, decoded outside the rusqlite row callback so JSON and
/// timestamp errors surface as `Corrupt` rather than SQLite errors.
struct JobRow {
    id: String,
    name: String,
    schedule_spec: String,
    action: String,
    use_local_time: i64,
    timezone: String,
    status: String,
    last_run: Option<String>,
    next_run: Option<String>,
    success_count: i64,
    fail_count: i64,
    average_runtime_secs: Option<f64>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            schedule_spec: row.get(2)?,
            action: row.get(3)?,
            use_local_time: row.get(4)?,
            timezone: row.get(5)?,
            status: row.get(6)?,
            last_run: row.get(7)?,
            next_run: row.get(8)?,
            success_count: row.get(9)?,
            fail_count: row.get(10)?,
            average_runtime_secs: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let action: JobAction = serde_json::from_str(&self.action)
            .map_err(|e| SchedulerError::Corrupt(format!("action for {}: {e}", self.id)))?;
        let status: JobStatus = self.status.parse().map_err(SchedulerError::Corrupt)?;
        Ok(Job {
            name: self.name,
            schedule_spec: self.schedule_spec,
            action,
            timezone_policy: TimezonePolicy {
                use_local_time: self.use_local_time != 0,
                timezone: self.timezone,
            },
            status,
            last_run: parse_opt_ts(self.last_run)?,
            next_run: parse_opt_ts(self.next_run)?,
            success_count: self.success_count.max(0) as u64,
            fail_count: self.fail_count.max(0) as u64,
            average_runtime_secs: self.average_runtime_secs,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            id: self.id,
        })
    }
}

struct LogRow {
    id: String,
    job_id: String,
    status: String,
    start_time: String,
    end_time: Option<String>,
    duration_secs: Option<f64>,
    output: String,
    error: Option<String>,
}

impl LogRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            status: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            duration_secs: row.get(5)?,
            output: row.get(6)?,
            error: row.get(7)?,
        })
    }

    fn into_log(self) -> Result<ExecutionLog> {
        let status: LogStatus = self.status.parse().map_err(SchedulerError::Corrupt)?;
        Ok(ExecutionLog {
            id: self.id,
            job_id: self.job_id,
            status,
            start_time: parse_ts(&self.start_time)?,
            end_time: parse_opt_ts(self.end_time)?,
            duration_secs: self.duration_secs,
            output: self.output,
            error: self.error,
        })
    }
}
