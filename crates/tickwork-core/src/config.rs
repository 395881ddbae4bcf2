use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FALLBACK_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_INVOKER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Top-level config (tickwork.toml + TICKWORK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickworkConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub invoker: InvokerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduling policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Delay used when a job's schedule spec cannot be parsed.
    /// Override with env var: TICKWORK_SCHEDULER__FALLBACK_INTERVAL_SECS
    #[serde(default = "default_fallback_interval_secs")]
    pub fallback_interval_secs: u64,
    /// Timezone applied to local-time jobs that do not name one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fallback_interval_secs: DEFAULT_FALLBACK_INTERVAL_SECS,
            default_timezone: default_timezone(),
        }
    }
}

/// HTTP action invoker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokerConfig {
    /// Per-request timeout when the job does not set its own.
    #[serde(default = "default_invoker_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_INVOKER_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }
}

fn default_fallback_interval_secs() -> u64 {
    DEFAULT_FALLBACK_INTERVAL_SECS
}
fn default_invoker_timeout_secs() -> u64 {
    DEFAULT_INVOKER_TIMEOUT_SECS
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_user_agent() -> String {
    format!("tickwork/{}", env!("CARGO_PKG_VERSION"))
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.db", home)
}

impl TickworkConfig {
    /// Load config from a TOML file with TICKWORK_* env var overrides.
    ///
    /// Nested keys are separated by a double underscore, e.g.
    /// `TICKWORK_INVOKER__TIMEOUT_SECS=10`.
    ///
    /// Uses the explicit path when given, otherwise ~/.tickwork/tickwork.toml.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("TICKWORK_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tickwork/tickwork.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_yields_defaults() {
        let config = TickworkConfig::from_figment(Figment::new()).expect("defaults");
        assert_eq!(config.scheduler.fallback_interval_secs, 60);
        assert_eq!(config.scheduler.default_timezone, "UTC");
        assert_eq!(config.invoker.timeout_secs, 30);
        assert!(config.database.path.ends_with("tickwork.db"));
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let toml = r#"
            [database]
            path = "/tmp/jobs.db"

            [scheduler]
            fallback_interval_secs = 15
        "#;
        let config = TickworkConfig::from_figment(Figment::new().merge(Toml::string(toml)))
            .expect("valid toml");
        assert_eq!(config.database.path, "/tmp/jobs.db");
        assert_eq!(config.scheduler.fallback_interval_secs, 15);
        // untouched fields keep their defaults
        assert_eq!(config.scheduler.default_timezone, "UTC");
        assert_eq!(config.invoker.timeout_secs, 30);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = TickworkConfig::load(Some("/nonexistent/tickwork/tickwork.toml"))
            .expect("missing file falls back to defaults");
        assert_eq!(config.scheduler.default_timezone, "UTC");
    }

    #[test]
    fn wrong_type_is_config_error() {
        let toml = r#"
            [scheduler]
            fallback_interval_secs = "soon"
        "#;
        let err = TickworkConfig::from_figment(Figment::new().merge(Toml::string(toml)))
            .unwrap_err();
        assert!(matches!(err, crate::error::CoreError::Config(_)));
    }
}
