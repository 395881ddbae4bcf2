//! Shared configuration and error types for the tickwork workspace.

pub mod config;
pub mod error;

pub use config::TickworkConfig;
pub use error::{CoreError, Result};
