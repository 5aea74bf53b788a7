//! Configuration types for the Praxis substrate

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the substrate
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PraxisConfig {
    /// Constitution gate configuration
    pub gate: GateConfig,

    /// Tactile router configuration
    pub router: RouterConfig,

    /// Campaign runner configuration
    pub runner: RunnerConfig,

    /// Rule repair configuration
    pub repair: RepairConfig,

    /// Cost guard configuration
    pub budget: BudgetConfig,
}

/// Constitution gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Polling cadence for `pending_action` facts
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
        }
    }
}

/// Tactile router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Polling cadence for `permitted_action` facts
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// When set, unmapped actions are recorded for autopoiesis instead of
    /// failing with `no_handler`
    pub allow_unmapped_actions: bool,

    /// Unhandled observations accumulated before a route proposal is
    /// attempted
    pub autopoiesis_threshold: usize,

    /// Cap on retained unhandled observations (drop-oldest beyond this)
    pub max_observations: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            allow_unmapped_actions: false,
            autopoiesis_threshold: 3,
            max_observations: 32,
        }
    }
}

/// Campaign runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Workspace root; campaigns live in `<workspace>/.nerd/campaigns/`
    pub workspace: PathBuf,

    /// Supervision cadence
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Restart backoff after an orchestrator failure, in seconds
    pub initial_backoff_secs: u64,

    /// Backoff ceiling, in seconds
    pub max_backoff_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            tick: Duration::from_secs(5),
            initial_backoff_secs: 5,
            max_backoff_secs: 300,
        }
    }
}

/// Rule repair configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Maximum repair attempts per rule (clamped to 1..=10 at use)
    pub max_retries: usize,

    /// Ceiling on candidate predicates included in a repair prompt
    pub max_prompt_predicates: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_prompt_predicates: 40,
        }
    }
}

/// Cost guard configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum LLM calls before the guard refuses
    pub max_llm_calls: u64,

    /// Maximum validation retries before the guard refuses
    pub max_validation_retries: u64,

    /// No recorded activity for this long means the owning shard is idle
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_llm_calls: 100,
            max_validation_retries: 30,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl PraxisConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. Configuration file (praxis.toml or path from PRAXIS_CONFIG_PATH)
    /// 3. Environment variable overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file is invalid.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Toml},
        };

        let mut figment = Figment::new()
            .merge(Toml::file("praxis.toml"))
            .merge(Env::prefixed("PRAXIS_").split("_"));

        if let Ok(path) = std::env::var("PRAXIS_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        figment.extract().map_err(|e| {
            crate::error::PraxisError::Configuration(format!("Failed to load configuration: {}", e))
        })
    }

    /// Load configuration from a specific file path.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        Figment::new().merge(Toml::file(path)).extract().map_err(|e| {
            crate::error::PraxisError::Configuration(format!(
                "Failed to load configuration file: {}",
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cadences() {
        let config = PraxisConfig::default();
        assert_eq!(config.router.tick, Duration::from_millis(100));
        assert_eq!(config.runner.tick, Duration::from_secs(5));
        assert_eq!(config.runner.initial_backoff_secs, 5);
        assert_eq!(config.runner.max_backoff_secs, 300);
        assert_eq!(config.repair.max_retries, 3);
    }

    #[test]
    fn test_round_trip_serialization() {
        let config = PraxisConfig::default();
        let text = serde_json::to_string(&config).expect("config must serialize");
        let back: PraxisConfig = serde_json::from_str(&text).expect("config must deserialize");
        assert_eq!(back.budget.idle_timeout, config.budget.idle_timeout);
    }
}
