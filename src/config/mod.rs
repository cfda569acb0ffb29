//! Layered configuration: a YAML file on disk, overridden by `SCHEDULER_`-prefixed
//! environment variables, validated range-by-range before use.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Development
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanditAlgorithm {
    Thompson,
    Ucb1,
    EpsilonGreedy,
    Exp3,
}

impl Default for BanditAlgorithm {
    fn default() -> Self {
        BanditAlgorithm::Thompson
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub time_limit_seconds: f64,
    pub num_search_workers: usize,
    pub random_seed: u64,
    pub enable_fallback: bool,
    pub max_horizon_days: u32,
    pub granularity_minutes: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_seconds: 10.0,
            num_search_workers: 4,
            random_seed: 42,
            enable_fallback: true,
            max_horizon_days: 30,
            granularity_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub bandit_algorithm: BanditAlgorithm,
    pub min_samples_for_update: usize,
    pub exploration_rate: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            bandit_algorithm: BanditAlgorithm::Thompson,
            min_samples_for_update: 5,
            exploration_rate: 0.1,
        }
    }
}

/// The fixed named set of penalty weights from spec §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultWeights {
    pub context_switch: f64,
    pub avoid_window: f64,
    pub late_night: f64,
    pub morning: f64,
    pub fragmentation: f64,
    pub spacing_violation: f64,
    pub fairness: f64,
}

impl Default for DefaultWeights {
    fn default() -> Self {
        Self {
            context_switch: 2.0,
            avoid_window: 3.0,
            late_night: 1.5,
            morning: 1.0,
            fragmentation: 1.5,
            spacing_violation: 1.0,
            fairness: 1.0,
        }
    }
}

impl DefaultWeights {
    pub fn as_map(&self) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert("contextSwitch".to_string(), self.context_switch);
        m.insert("avoidWindow".to_string(), self.avoid_window);
        m.insert("lateNight".to_string(), self.late_night);
        m.insert("morning".to_string(), self.morning);
        m.insert("fragmentation".to_string(), self.fragmentation);
        m.insert("spacingViolation".to_string(), self.spacing_violation);
        m.insert("fairness".to_string(), self.fairness);
        m
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub history_window_days: u32,
    pub unknown_stat_default: f64,
    pub no_study_windows_hard: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            history_window_days: 7,
            unknown_stat_default: 0.5,
            no_study_windows_hard: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub export_interval_seconds: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enabled: true, export_interval_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub idempotency_ttl_minutes: i64,
    pub conversation_state_ttl_minutes: i64,
    pub clarification_ttl_minutes: i64,
    pub recent_turns_ttl_hours: i64,
    pub recent_turns_n: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_minutes: 60,
            conversation_state_ttl_minutes: 60,
            clarification_ttl_minutes: 5,
            recent_turns_ttl_hours: 24,
            recent_turns_n: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "scheduler.sqlite3".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub environment: Environment,
    pub solver: SolverConfig,
    pub learning: LearningConfig,
    pub default_weights: DefaultWeights,
    pub features: FeatureConfig,
    pub telemetry: TelemetryConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub time_granularity_minutes: u32,
    pub max_horizon_days: u32,
    pub default_horizon_days: u32,
    pub enable_fallback_solver: bool,
    pub enable_adaptive_rescheduling: bool,
    pub rate_limit_requests_per_minute: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            solver: SolverConfig::default(),
            learning: LearningConfig::default(),
            default_weights: DefaultWeights::default(),
            features: FeatureConfig::default(),
            telemetry: TelemetryConfig::default(),
            cache: CacheConfig::default(),
            database: DatabaseConfig::default(),
            time_granularity_minutes: 30,
            max_horizon_days: 30,
            default_horizon_days: 7,
            enable_fallback_solver: true,
            enable_adaptive_rescheduling: true,
            rate_limit_requests_per_minute: 60,
        }
    }
}

impl SchedulerConfig {
    /// Collect every range violation instead of failing on the first one.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(1.0..=300.0).contains(&self.solver.time_limit_seconds) {
            errors.push(format!(
                "solver.time_limit_seconds must be in 1..300, got {}",
                self.solver.time_limit_seconds
            ));
        }
        if !(1..=16).contains(&self.solver.num_search_workers) {
            errors.push(format!(
                "solver.num_search_workers must be in 1..16, got {}",
                self.solver.num_search_workers
            ));
        }
        if self.solver.granularity_minutes != 15 && self.solver.granularity_minutes != 30 {
            errors.push(format!(
                "solver.granularity_minutes must be 15 or 30, got {}",
                self.solver.granularity_minutes
            ));
        }
        if !(1..=90).contains(&self.max_horizon_days) {
            errors.push(format!("max_horizon_days must be in 1..90, got {}", self.max_horizon_days));
        }
        if self.default_horizon_days < 1 || self.default_horizon_days > self.max_horizon_days {
            errors.push(format!(
                "default_horizon_days ({}) must be in 1..max_horizon_days ({})",
                self.default_horizon_days, self.max_horizon_days
            ));
        }
        if self.time_granularity_minutes != 15 && self.time_granularity_minutes != 30 {
            errors.push(format!(
                "time_granularity_minutes must be 15 or 30, got {}",
                self.time_granularity_minutes
            ));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Loads a `SchedulerConfig` from a YAML file, then overlays `SCHEDULER_`-prefixed
/// environment variables using dot-path mapping (e.g. `SCHEDULER_SOLVER_TIME_LIMIT_SECONDS`
/// maps to `solver.time_limit_seconds`).
pub struct ConfigLoader {
    path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { path: None }
    }

    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self { path: Some(path.as_ref().to_path_buf()) }
    }

    pub fn load(&self) -> Result<SchedulerConfig> {
        let mut config = match &self.path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)?
            }
            _ => SchedulerConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;

        config
            .validate()
            .map_err(|errs| Error::Validation(errs.join("; ")))?;

        Ok(config)
    }

    fn apply_env_overrides(&self, config: &mut SchedulerConfig) -> Result<()> {
        const PREFIX: &str = "SCHEDULER_";

        for (key, value) in std::env::vars() {
            let Some(path) = key.strip_prefix(PREFIX) else { continue };
            let path = path.to_lowercase();

            match path.as_str() {
                "solver_time_limit_seconds" => {
                    config.solver.time_limit_seconds = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "solver_num_search_workers" => {
                    config.solver.num_search_workers = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "solver_random_seed" => {
                    config.solver.random_seed = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "solver_granularity_minutes" => {
                    config.solver.granularity_minutes = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "max_horizon_days" => {
                    config.max_horizon_days = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "default_horizon_days" => {
                    config.default_horizon_days = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "rate_limit_requests_per_minute" => {
                    config.rate_limit_requests_per_minute = value
                        .parse()
                        .map_err(|_| Error::Validation(format!("invalid {key}: {value}")))?;
                }
                "database_path" => {
                    config.database.path = value;
                }
                _ => {} // unknown overrides are ignored, not fatal
            }
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_time_limit() {
        let mut config = SchedulerConfig::default();
        config.solver.time_limit_seconds = 1000.0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("time_limit_seconds")));
    }

    #[test]
    fn test_default_weights_as_map() {
        let map = DefaultWeights::default().as_map();
        assert_eq!(map.get("contextSwitch"), Some(&2.0));
        assert_eq!(map.get("fairness"), Some(&1.0));
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_loader_no_file_returns_defaults() {
        let loader = ConfigLoader::new();
        let config = loader.load().unwrap();
        assert_eq!(config.solver.time_limit_seconds, 10.0);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SCHEDULER_SOLVER_TIME_LIMIT_SECONDS", "5.0");
        let loader = ConfigLoader::new();
        let config = loader.load().unwrap();
        assert_eq!(config.solver.time_limit_seconds, 5.0);
        std::env::remove_var("SCHEDULER_SOLVER_TIME_LIMIT_SECONDS");
    }
}
