//! Engine configuration: database connection, sweep cadence, heartbeat
//! defaults and the per-replica claim cap (SPEC_FULL.md §2, §6).
//!
//! Loaded from an optional YAML file and then overlaid with environment
//! variables, mirroring the teacher's `${ENV:default}` convention but
//! scoped to plain `RIPPLE_*` variable names rather than inline YAML
//! expansion — there is no HTTP surface here to justify the full
//! include/merge machinery.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_sweep_period_secs")]
    pub period_secs: u64,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_sweep_period_secs() -> u64 {
    60
}

fn default_min_interval_secs() -> i64 {
    90
}

fn default_true() -> bool {
    true
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            period_secs: default_sweep_period_secs(),
            min_interval_secs: default_min_interval_secs(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepsConfig {
    #[serde(default)]
    pub abandoned: SweepConfig,
    #[serde(default)]
    pub schedule_nodes: SweepConfig,
    #[serde(default)]
    pub unblocked_by_schedule: SweepConfig,
    #[serde(default)]
    pub regenerate_schedule_recurring: SweepConfig,
    #[serde(default = "missed_schedules_default")]
    pub missed_schedules_catchall: SweepConfig,
    #[serde(default)]
    pub stalled_executions: SweepConfig,
}

fn missed_schedules_default() -> SweepConfig {
    SweepConfig {
        period_secs: 86_400,
        min_interval_secs: 82_800,
        enabled: true,
    }
}

impl Default for SweepsConfig {
    fn default() -> Self {
        Self {
            abandoned: SweepConfig::default(),
            schedule_nodes: SweepConfig::default(),
            unblocked_by_schedule: SweepConfig::default(),
            regenerate_schedule_recurring: SweepConfig::default(),
            missed_schedules_catchall: missed_schedules_default(),
            stalled_executions: SweepConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sweeps: SweepsConfig,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub default_heartbeat_interval_secs: i64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub default_heartbeat_timeout_secs: i64,
    #[serde(default = "default_abandon_after_secs")]
    pub default_abandon_after_secs: i64,
    #[serde(default = "default_max_concurrent_claims")]
    pub max_concurrent_claims: usize,
    #[serde(default = "default_missed_schedules_lookback_days")]
    pub missed_schedules_lookback_days: i64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_heartbeat_interval_secs() -> i64 {
    30
}

fn default_heartbeat_timeout_secs() -> i64 {
    90
}

fn default_abandon_after_secs() -> i64 {
    300
}

fn default_max_concurrent_claims() -> usize {
    16
}

fn default_missed_schedules_lookback_days() -> i64 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    /// A config with every tunable at its spec-default, and an empty
    /// database URL — callers that already hold a connected pool (tests,
    /// mostly) construct the engine directly and never read `database.url`.
    fn default() -> Self {
        Self {
            database: DatabaseConfig { url: String::new(), max_connections: default_max_connections() },
            sweeps: SweepsConfig::default(),
            default_heartbeat_interval_secs: default_heartbeat_interval_secs(),
            default_heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            default_abandon_after_secs: default_abandon_after_secs(),
            max_concurrent_claims: default_max_concurrent_claims(),
            missed_schedules_lookback_days: default_missed_schedules_lookback_days(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Loads an optional YAML file at `path`, then applies `RIPPLE_*`
    /// environment overrides on top. Absence of `path` is not an error:
    /// every field has either a required env var (`RIPPLE_DATABASE_URL`)
    /// or a default.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(p)
                    .map_err(|e| ConfigError::Io(p.display().to_string(), e.to_string()))?;
                serde_yaml::from_str(&content)
                    .map_err(|e| ConfigError::Parse(p.display().to_string(), e.to_string()))?
            }
            _ => Self::from_env_only()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_env_only() -> Result<Self, ConfigError> {
        let url = env::var("RIPPLE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("RIPPLE_DATABASE_URL".to_string()))?;
        Ok(Self {
            database: DatabaseConfig { url, max_connections: default_max_connections() },
            sweeps: SweepsConfig::default(),
            default_heartbeat_interval_secs: default_heartbeat_interval_secs(),
            default_heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            default_abandon_after_secs: default_abandon_after_secs(),
            max_concurrent_claims: default_max_concurrent_claims(),
            missed_schedules_lookback_days: default_missed_schedules_lookback_days(),
            log_level: default_log_level(),
        })
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("RIPPLE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(v) = env_parsed::<u32>("RIPPLE_DB_MAX_CONNECTIONS") {
            self.database.max_connections = v;
        }
        if let Some(v) = env_parsed::<usize>("RIPPLE_MAX_CONCURRENT_CLAIMS") {
            self.max_concurrent_claims = v;
        }
        if let Ok(level) = env::var("RUST_LOG") {
            self.log_level = level;
        }
        for (name, sweep) in [
            ("ABANDONED", &mut self.sweeps.abandoned),
            ("SCHEDULE_NODES", &mut self.sweeps.schedule_nodes),
            ("UNBLOCKED_BY_SCHEDULE", &mut self.sweeps.unblocked_by_schedule),
            ("REGENERATE_SCHEDULE_RECURRING", &mut self.sweeps.regenerate_schedule_recurring),
            ("MISSED_SCHEDULES_CATCHALL", &mut self.sweeps.missed_schedules_catchall),
            ("STALLED_EXECUTIONS", &mut self.sweeps.stalled_executions),
        ] {
            if let Some(v) = env_parsed::<i64>(&format!("RIPPLE_SWEEP_{name}_MIN_INTERVAL_SECS")) {
                sweep.min_interval_secs = v;
            }
            if let Ok(v) = env::var(format!("RIPPLE_SWEEP_{name}_ENABLED")) {
                sweep.enabled = v != "0" && v.to_lowercase() != "false";
            }
        }
        if let Some(v) = env_parsed::<u64>("RIPPLE_SWEEP_PERIOD_SECS") {
            for sweep in [
                &mut self.sweeps.abandoned,
                &mut self.sweeps.schedule_nodes,
                &mut self.sweeps.unblocked_by_schedule,
                &mut self.sweeps.regenerate_schedule_recurring,
                &mut self.sweeps.stalled_executions,
            ] {
                sweep.period_secs = v;
            }
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.default_heartbeat_interval_secs.max(0) as u64)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(String),
    #[error("failed to read config file {0}: {1}")]
    Io(String, String),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_only_requires_database_url() {
        std::env::remove_var("RIPPLE_DATABASE_URL");
        let err = EngineConfig::load(None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(_)));
    }

    #[test]
    fn env_only_picks_up_database_url() {
        std::env::set_var("RIPPLE_DATABASE_URL", "postgres://localhost/ripple_test");
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/ripple_test");
        assert_eq!(config.max_concurrent_claims, 16);
        std::env::remove_var("RIPPLE_DATABASE_URL");
    }

    #[test]
    fn sweep_period_override_applies_to_all_periodic_sweeps() {
        std::env::set_var("RIPPLE_DATABASE_URL", "postgres://localhost/ripple_test");
        std::env::set_var("RIPPLE_SWEEP_PERIOD_SECS", "30");
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.sweeps.abandoned.period_secs, 30);
        assert_eq!(config.sweeps.stalled_executions.period_secs, 30);
        std::env::remove_var("RIPPLE_DATABASE_URL");
        std::env::remove_var("RIPPLE_SWEEP_PERIOD_SECS");
    }
}
