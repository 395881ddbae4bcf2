//! Folding execution outcomes into a job's running counters.
//!
//! Failed executions count toward `average_runtime_secs` exactly like
//! successful ones, so the mean is taken over `success_count + fail_count`.

use crate::types::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Result of one finalized execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub duration_secs: f64,
}

impl Outcome {
    pub fn success(duration_secs: f64) -> Self {
        Self {
            status: OutcomeStatus::Success,
            duration_secs,
        }
    }

    pub fn failed(duration_secs: f64) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            duration_secs,
        }
    }
}

/// Return a copy of `job` with `outcome` folded into its counters.
///
/// Only the counters and the mean change; status is the pipeline's business.
pub fn apply_outcome(job: &Job, outcome: Outcome) -> Job {
    let mut next = job.clone();
    match outcome.status {
        OutcomeStatus::Success => next.success_count += 1,
        OutcomeStatus::Failed => next.fail_count += 1,
    }

    let n = (next.success_count + next.fail_count) as f64;
    let previous = job.average_runtime_secs.unwrap_or(0.0);
    next.average_runtime_secs = Some(previous + (outcome.duration_secs - previous) / n);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobAction, TimezonePolicy};
    use chrono::Utc;

    fn fresh() -> Job {
        Job::new(
            "stats",
            "10",
            JobAction::get("http://localhost/"),
            TimezonePolicy::utc(),
            Utc::now(),
        )
    }

    #[test]
    fn two_successes_average() {
        let job = apply_outcome(&fresh(), Outcome::success(2.0));
        let job = apply_outcome(&job, Outcome::success(4.0));
        assert_eq!(job.success_count, 2);
        assert_eq!(job.fail_count, 0);
        assert_eq!(job.average_runtime_secs, Some(3.0));
    }

    #[test]
    fn failures_count_toward_mean() {
        let job = apply_outcome(&fresh(), Outcome::success(1.0));
        let job = apply_outcome(&job, Outcome::failed(5.0));
        assert_eq!(job.success_count, 1);
        assert_eq!(job.fail_count, 1);
        assert_eq!(job.average_runtime_secs, Some(3.0));
    }

    #[test]
    fn first_outcome_sets_mean() {
        let job = apply_outcome(&fresh(), Outcome::failed(0.25));
        assert_eq!(job.fail_count, 1);
        assert_eq!(job.average_runtime_secs, Some(0.25));
    }

    #[test]
    fn input_is_untouched() {
        let job = fresh();
        let _ = apply_outcome(&job, Outcome::success(9.0));
        assert_eq!(job.success_count, 0);
        assert_eq!(job.average_runtime_secs, None);
    }

    #[test]
    fn mean_continues_from_existing_counters() {
        let mut job = fresh();
        job.success_count = 3;
        job.fail_count = 1;
        job.average_runtime_secs = Some(2.0);
        let job = apply_outcome(&job, Outcome::success(7.0));
        assert_eq!(job.average_runtime_secs, Some(3.0));
    }
}
