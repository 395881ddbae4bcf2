use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` and `execution_logs` tables (idempotent). Logs are
/// indexed by `(job_id, start_time)` so per-job history queries stay cheap.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                   TEXT    NOT NULL PRIMARY KEY,
            name                 TEXT    NOT NULL,
            schedule_spec        TEXT    NOT NULL,   -- interval seconds or cron
            action               TEXT    NOT NULL,   -- JSON-encoded JobAction
            use_local_time       INTEGER NOT NULL DEFAULT 0,
            timezone             TEXT    NOT NULL DEFAULT '',
            status               TEXT    NOT NULL DEFAULT 'idle',
            last_run             TEXT,               -- RFC 3339 or NULL
            next_run             TEXT,               -- RFC 3339 or NULL
            success_count        INTEGER NOT NULL DEFAULT 0,
            fail_count           INTEGER NOT NULL DEFAULT 0,
            average_runtime_secs REAL,
            created_at           TEXT    NOT NULL,
            updated_at           TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS execution_logs (
            id            TEXT NOT NULL PRIMARY KEY,
            job_id        TEXT NOT NULL,
            status        TEXT NOT NULL,
            start_time    TEXT NOT NULL,
            end_time      TEXT,
            duration_secs REAL,
            output        TEXT NOT NULL DEFAULT '',
            error         TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_logs_job_start
            ON execution_logs (job_id, start_time);
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('jobs', 'execution_logs')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(n, 2);
    }
}
