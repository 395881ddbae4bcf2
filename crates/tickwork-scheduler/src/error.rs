use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schedule spec is neither an interval nor a valid cron expression.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// No execution log with the given ID exists in the store.
    #[error("Execution log not found: {id}")]
    LogNotFound { id: String },

    /// A second finalization was attempted on the same execution log.
    #[error("Execution log already finalized: {id}")]
    AlreadyFinalized { id: String },

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl SchedulerError {
    /// True for failures of the persistence collaborator.
    pub fn is_persistence(&self) -> bool {
        !matches!(self, SchedulerError::InvalidSchedule(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
