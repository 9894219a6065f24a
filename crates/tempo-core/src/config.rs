//! Configuration loading and typed config structures for Tempo.
//!
//! The canonical configuration lives in `tempo-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, a
//! loader that reads the file, and validation of the values the engine
//! cannot run with.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tempo_types::{EventType, SimTime};

use crate::clock::MIN_TICK_INTERVAL;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but cannot be used.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TempoConfig {
    /// Simulated clock settings.
    #[serde(default)]
    pub clock: ClockConfig,

    /// Tick engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Recurring jobs installed at bootstrap.
    #[serde(default = "default_jobs")]
    pub jobs: Vec<JobConfig>,

    /// Where domain handlers send their side-effecting calls.
    #[serde(default)]
    pub collaborator: CollaboratorConfig,

    /// Admin HTTP surface.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            clock: ClockConfig::default(),
            engine: EngineConfig::default(),
            jobs: default_jobs(),
            collaborator: CollaboratorConfig::default(),
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TempoConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `TEMPO_COLLABORATOR_URL` overrides `collaborator.base_url`
    /// - `TEMPO_ADMIN_PORT` overrides `admin.port`
    /// - `TEMPO_DRIVER` overrides `engine.driver`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the variable source.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TEMPO_COLLABORATOR_URL") {
            self.collaborator.base_url = url;
        }
        if let Some(raw) = lookup("TEMPO_ADMIN_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => self.admin.port = port,
                Err(err) => tracing::warn!(value = %raw, %err, "Ignoring invalid TEMPO_ADMIN_PORT"),
            }
        }
        if let Some(raw) = lookup("TEMPO_DRIVER") {
            match raw.to_lowercase().as_str() {
                "timer" => self.engine.driver = DriverMode::Timer,
                "external" => self.engine.driver = DriverMode::External,
                _ => tracing::warn!(value = %raw, "Ignoring unknown TEMPO_DRIVER"),
            }
        }
    }

    /// Check values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Duration::from_millis(self.clock.tick_interval_ms) < MIN_TICK_INTERVAL {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "clock.tick_interval_ms must be at least {}",
                    MIN_TICK_INTERVAL.as_millis()
                ),
            });
        }
        if self.engine.max_concurrent_deliveries == 0 {
            return Err(invalid("engine.max_concurrent_deliveries must be at least 1"));
        }
        if self.engine.max_firings_per_tick == 0 {
            return Err(invalid("engine.max_firings_per_tick must be at least 1"));
        }
        for job in &self.jobs {
            job.interval()?;
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// Simulated clock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClockConfig {
    /// Simulated time at process start (RFC 3339).
    #[serde(default = "default_start_time")]
    pub start_time: SimTime,

    /// Real-time milliseconds between automatic ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Simulated milliseconds per real millisecond.
    #[serde(default = "default_time_multiplier")]
    pub time_multiplier: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            tick_interval_ms: default_tick_interval_ms(),
            time_multiplier: default_time_multiplier(),
        }
    }
}

/// How ticks are driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverMode {
    /// A real-time timer inside a long-lived process.
    #[default]
    Timer,
    /// Discrete external calls to `tick_once` (e.g. a cron trigger).
    External,
}

/// Tick engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// How ticks are driven.
    #[serde(default)]
    pub driver: DriverMode,

    /// Upper bound on fired events queued for, or being handled by, the
    /// delivery worker.
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    /// Upper bound on occurrences fired by a single tick; the rest wait
    /// for the next tick.
    #[serde(default = "default_max_firings_per_tick")]
    pub max_firings_per_tick: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            driver: DriverMode::default(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            max_firings_per_tick: default_max_firings_per_tick(),
        }
    }
}

/// A recurring job installed at bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobConfig {
    /// Event type fired by the job.
    pub event_type: EventType,

    /// Simulated seconds between runs.
    pub interval_secs: u64,

    /// Payload attached to every run.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl JobConfig {
    /// Build a job config.
    pub const fn new(event_type: EventType, interval_secs: u64) -> Self {
        Self {
            event_type,
            interval_secs,
            payload: serde_json::Value::Null,
        }
    }

    /// The job interval as a simulated duration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the interval is zero or too large.
    pub fn interval(&self) -> Result<TimeDelta, ConfigError> {
        let secs = i64::try_from(self.interval_secs).ok();
        match secs.and_then(TimeDelta::try_seconds) {
            Some(delta) if delta > TimeDelta::zero() => Ok(delta),
            _ => Err(ConfigError::Invalid {
                reason: format!(
                    "job '{}' has unusable interval_secs {}",
                    self.event_type, self.interval_secs
                ),
            }),
        }
    }
}

/// External collaborator endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollaboratorConfig {
    /// Base URL that handler routes are appended to.
    #[serde(default = "default_collaborator_url")]
    pub base_url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_collaborator_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_collaborator_url(),
            timeout_ms: default_collaborator_timeout_ms(),
        }
    }
}

/// Admin HTTP surface configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdminConfig {
    /// Whether to serve the admin API.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Host address to bind to.
    #[serde(default = "default_admin_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_admin_host(),
            port: default_admin_port(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// 2025-01-01T00:00:00Z.
fn default_start_time() -> SimTime {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

const fn default_tick_interval_ms() -> u64 {
    1_000
}

/// One simulated hour per real second.
const fn default_time_multiplier() -> u32 {
    3_600
}

const fn default_max_concurrent_deliveries() -> usize {
    64
}

const fn default_max_firings_per_tick() -> usize {
    10_000
}

const DAY_SECS: u64 = 86_400;

fn default_jobs() -> Vec<JobConfig> {
    vec![
        JobConfig::new(EventType::Payroll, DAY_SECS.saturating_mul(7)),
        JobConfig::new(EventType::ContractDeadline, DAY_SECS),
        JobConfig::new(EventType::SkillDecay, DAY_SECS.saturating_mul(7)),
    ]
}

fn default_collaborator_url() -> String {
    "http://127.0.0.1:8080".to_owned()
}

const fn default_collaborator_timeout_ms() -> u64 {
    5_000
}

const fn default_true() -> bool {
    true
}

fn default_admin_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_admin_port() -> u16 {
    7_070
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TempoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock.tick_interval_ms, 1_000);
        assert_eq!(config.engine.driver, DriverMode::Timer);
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped: TempoConfig =
            serde_yml::from_str(include_str!("../../../tempo-config.yaml")).unwrap();
        assert!(shipped.validate().is_ok());
        assert_eq!(shipped, TempoConfig::default());
    }

    #[test]
    fn empty_yaml_uses_default_jobs() {
        let config: TempoConfig = serde_yml::from_str("{}").unwrap();
        let types: Vec<_> = config.jobs.iter().map(|j| j.event_type.clone()).collect();
        assert_eq!(
            types,
            vec![
                EventType::Payroll,
                EventType::ContractDeadline,
                EventType::SkillDecay
            ]
        );
        assert_eq!(config.jobs.first().unwrap().interval().unwrap(), TimeDelta::days(7));
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
clock:
  start_time: "2030-06-01T00:00:00Z"
  tick_interval_ms: 250
  time_multiplier: 86400

engine:
  driver: external
  max_concurrent_deliveries: 8
  max_firings_per_tick: 100

jobs:
  - event_type: payroll
    interval_secs: 1209600
  - event_type: marketClose
    interval_secs: 86400
    payload:
      region: north

collaborator:
  base_url: "http://payroll.internal:9000"
  timeout_ms: 2000

admin:
  enabled: false
  port: 9999

logging:
  level: debug
  format: json
"#;
        let config = TempoConfig::parse(yaml).unwrap();
        assert_eq!(config.clock.tick_interval_ms, 250);
        assert_eq!(config.clock.time_multiplier, 86_400);
        assert_eq!(config.clock.start_time.to_rfc3339(), "2030-06-01T00:00:00+00:00");
        assert_eq!(config.engine.driver, DriverMode::External);
        assert_eq!(config.engine.max_concurrent_deliveries, 8);
        assert_eq!(config.jobs.len(), 2);
        let custom = config.jobs.get(1).unwrap();
        assert_eq!(custom.event_type, EventType::Custom("marketClose".to_owned()));
        assert_eq!(custom.payload["region"], "north");
        assert!(!config.admin.enabled);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_interval_job_is_rejected() {
        let yaml = r"
jobs:
  - event_type: payroll
    interval_secs: 0
";
        let result = TempoConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn tick_interval_below_clock_minimum_is_rejected() {
        let mut config = TempoConfig::default();
        config.clock.tick_interval_ms = 9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.clock.tick_interval_ms = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = TempoConfig::default();
        config.engine.max_concurrent_deliveries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = TempoConfig::default();
        config.apply_overrides_from(|key| match key {
            "TEMPO_COLLABORATOR_URL" => Some("http://override:1".to_owned()),
            "TEMPO_ADMIN_PORT" => Some("8181".to_owned()),
            "TEMPO_DRIVER" => Some("External".to_owned()),
            _ => None,
        });
        assert_eq!(config.collaborator.base_url, "http://override:1");
        assert_eq!(config.admin.port, 8181);
        assert_eq!(config.engine.driver, DriverMode::External);
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = TempoConfig::default();
        config.apply_overrides_from(|key| (key == "TEMPO_ADMIN_PORT").then(|| "abc".to_owned()));
        assert_eq!(config.admin.port, 7_070);
    }

    #[test]
    fn bad_yaml_is_an_error() {
        let result = TempoConfig::parse("clock: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
