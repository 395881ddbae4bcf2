use std::sync::Arc;

use clap::{Parser, Subcommand};
use tickwork_core::config::TickworkConfig;
use tickwork_scheduler::{
    Clock, HttpInvoker, Job, JobFilter, JobStore, SchedulerEngine, SqliteStore, SystemClock,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "tickworkd", version, about = "Persistent job scheduler daemon")]
struct Cli {
    /// Config file (falls back to TICKWORK_CONFIG, then ~/.tickwork/tickwork.toml).
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Recover schedules and run until Ctrl-C (default).
    Run,
    /// Print every job with its counters.
    Jobs,
    /// Print the most recent executions of a job.
    Logs {
        job_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickwork_daemon=info,tickwork_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // config: --config > TICKWORK_CONFIG env > ~/.tickwork/tickwork.toml
    let config_path = cli.config.or_else(|| std::env::var("TICKWORK_CONFIG").ok());
    let config = TickworkConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TickworkConfig::default()
    });

    let db_path = &config.database.path;
    if let Err(e) = ensure_parent_dir(db_path) {
        warn!(path = %db_path, error = %e, "could not create database directory");
    }
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    let store = Arc::new(SqliteStore::new(db)?);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::Jobs => print_jobs(store.as_ref()).await,
        Command::Logs { job_id, limit } => print_logs(store.as_ref(), &job_id, limit).await,
    }
}

async fn run(config: TickworkConfig, store: Arc<SqliteStore>) -> anyhow::Result<()> {
    let invoker = Arc::new(HttpInvoker::new(&config.invoker));
    let engine = Arc::new(SchedulerEngine::new(
        store,
        invoker,
        Arc::new(SystemClock),
        &config.scheduler,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, draining in-flight executions");
    let _ = shutdown_tx.send(true);

    match runner.await? {
        Ok(()) => info!("tickworkd stopped"),
        Err(e) => error!(error = %e, "scheduler engine stopped with error"),
    }
    Ok(())
}

async fn print_jobs(store: &dyn JobStore) -> anyhow::Result<()> {
    let jobs = store.list_jobs(&JobFilter::all()).await?;
    if jobs.is_empty() {
        println!("no jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {:<8} {:<20} spec={:<16} next={} ok={} fail={} avg={}",
            job.id,
            job.status.to_string(),
            job.name,
            job.schedule_spec,
            display_next_run(&job),
            job.success_count,
            job.fail_count,
            job.average_runtime_secs
                .map(|s| format!("{s:.3}s"))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    Ok(())
}

/// `next_run` in the job's own frame when it runs on local time.
fn display_next_run(job: &Job) -> String {
    let Some(next) = job.next_run else {
        return "-".to_string();
    };
    let policy = &job.timezone_policy;
    if policy.use_local_time {
        if let Some(local) = SystemClock.to_zoned(next, &policy.timezone) {
            return local.to_rfc3339();
        }
    }
    next.to_rfc3339()
}

async fn print_logs(store: &dyn JobStore, job_id: &str, limit: usize) -> anyhow::Result<()> {
    let logs = store.list_logs(job_id, limit).await?;
    if logs.is_empty() {
        println!("no executions for {job_id}");
        return Ok(());
    }
    for log in logs {
        let detail = log.error.clone().unwrap_or_else(|| first_line(&log.output));
        println!(
            "{}  {:<7} {} {}  {}",
            log.id,
            log.status.to_string(),
            log.start_time.to_rfc3339(),
            log.duration_secs
                .map(|s| format!("{s:.3}s"))
                .unwrap_or_else(|| "-".to_string()),
            detail,
        );
    }
    Ok(())
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tickwork_scheduler::{JobAction, TimezonePolicy};

    fn job(policy: TimezonePolicy) -> Job {
        let mut job = Job::new(
            "report",
            "0 0 9 * * *",
            JobAction::get("http://localhost/"),
            policy,
            Utc::now(),
        );
        job.next_run = Some(Utc.with_ymd_and_hms(2026, 1, 11, 0, 0, 0).unwrap());
        job
    }

    #[test]
    fn next_run_shown_in_local_frame() {
        let shown = display_next_run(&job(TimezonePolicy::local("Asia/Tokyo")));
        assert_eq!(shown, "2026-01-11T09:00:00+09:00");
    }

    #[test]
    fn next_run_shown_in_utc_otherwise() {
        let shown = display_next_run(&job(TimezonePolicy::utc()));
        assert_eq!(shown, "2026-01-11T00:00:00+00:00");
    }

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("tickworkd-{tag}-{}", std::process::id()))
    }

    #[test]
    fn parent_dir_is_created() {
        let root = scratch_dir("mkdir");
        let db = root.join("nested").join("tickwork.db");
        ensure_parent_dir(db.to_str().unwrap()).unwrap();
        assert!(root.join("nested").is_dir());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn parent_dir_error_is_reported() {
        let root = scratch_dir("blocked");
        std::fs::create_dir_all(&root).unwrap();
        let file = root.join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let db = file.join("tickwork.db");
        assert!(ensure_parent_dir(db.to_str().unwrap()).is_err());
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn bare_file_name_needs_no_dir() {
        assert!(ensure_parent_dir("tickwork.db").is_ok());
    }

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::parse_from(["tickworkd"]);
        assert!(cli.command.is_none());
        let cli = Cli::parse_from(["tickworkd", "logs", "abc", "--limit", "5"]);
        assert!(matches!(cli.command, Some(Command::Logs { limit: 5, .. })));
    }
}
