//! `tickwork-scheduler`: per-job timer chains that fire actions and keep
//! execution statistics, persisted through a pluggable store.
//!
//! # Overview
//!
//! Each non-paused job owns one Tokio task that sleeps until its next fire,
//! runs the [`pipeline::ExecutionPipeline`], re-reads the job and re-arms.
//! The [`engine::SchedulerEngine`] rebuilds every chain on startup and is the
//! surface for pause / resume / cancel.
//!
//! # Schedule specs
//!
//! | Spec              | Behaviour                                        |
//! |-------------------|--------------------------------------------------|
//! | `"300"`           | Every 300 seconds after the previous completion  |
//! | `"0 0 9 * * *"`   | Cron (sec min hour dom mon dow), job's timezone  |
//! | `"*/5 * * * *"`   | Five-field cron, fires at second zero            |
//! | anything else     | Fallback interval (60 s by default)              |

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod invoker;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod sqlite;
pub mod stats;
pub mod store;
pub mod types;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use invoker::{ActionError, ActionInvoker, HttpInvoker};
pub use registry::TimerRegistry;
pub use sqlite::SqliteStore;
pub use store::{JobStore, MemoryStore};
pub use types::{
    ExecutionLog, Job, JobAction, JobFilter, JobPatch, JobStatus, LogStatus, TimezonePolicy,
};
