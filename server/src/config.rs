//! Engine configuration
//!
//! One [`WorldConfig`] applies by default; individual worlds may override it.
//! Everything has built-in defaults, so an empty JSON object is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::escalation::{Action, ActionList, ActionThreshold, LogLevel};
use crate::lag_clock::LagClockConfig;
use crate::packet_rate::RateLimitConfig;
use crate::violation::ViolationConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// What happens to per-entity state when configuration is reloaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Drop every tracked entity
    ClearAll,
    /// Reset counters, levels and history but keep setback points
    #[default]
    PreserveSetbacks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MorePacketsConfig {
    pub enabled: bool,
    pub rate: RateLimitConfig,
    pub violation: ViolationConfig,
    pub actions: ActionList,
}

impl Default for MorePacketsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: RateLimitConfig::default(),
            violation: ViolationConfig::default(),
            actions: default_more_packets_actions(),
        }
    }
}

/// Check settings for one world
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub more_packets: MorePacketsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub clock: LagClockConfig,
    pub reload_policy: ReloadPolicy,
    /// Entities idle for longer than this are dropped by a sweep
    pub sweep_idle_secs: u64,
    pub defaults: WorldConfig,
    pub worlds: HashMap<String, WorldConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clock: LagClockConfig::default(),
            reload_policy: ReloadPolicy::default(),
            sweep_idle_secs: 60,
            defaults: WorldConfig::default(),
            worlds: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn for_world(&self, world: &str) -> &WorldConfig {
        self.worlds.get(world).unwrap_or(&self.defaults)
    }

    pub fn sweep_idle(&self) -> Duration {
        Duration::from_secs(self.sweep_idle_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clock.ticks_per_window == 0 {
            return Err(ConfigError::Invalid("clock.ticks_per_window must be positive".into()));
        }
        validate_world("defaults", &self.defaults)?;
        for (name, world) in &self.worlds {
            validate_world(name, world)?;
        }
        Ok(())
    }
}

fn validate_world(name: &str, world: &WorldConfig) -> Result<(), ConfigError> {
    let more_packets = &world.more_packets;
    let decay = more_packets.violation.decay;
    if !(decay > 0.0 && decay <= 1.0) {
        return Err(ConfigError::Invalid(format!(
            "{name}: more_packets.violation.decay must be in (0, 1], got {decay}"
        )));
    }
    if more_packets.rate.buffer_limit == 0 {
        return Err(ConfigError::Invalid(format!(
            "{name}: more_packets.rate.buffer_limit must be positive"
        )));
    }
    if more_packets.rate.allowed_rate_per_second == 0 {
        return Err(ConfigError::Invalid(format!(
            "{name}: more_packets.rate.allowed_rate_per_second must be positive"
        )));
    }
    Ok(())
}

pub fn default_more_packets_actions() -> ActionList {
    let message = "[player] sent [packets] more packets than allowed ([limit]) in [world], vl [violations]";
    ActionList::new(vec![
        ActionThreshold {
            threshold: 0,
            actions: vec![Action::log("log_low", LogLevel::Low, message), Action::cancel()],
        },
        ActionThreshold {
            threshold: 30,
            actions: vec![Action::log("log_med", LogLevel::Med, message), Action::cancel()],
        },
        ActionThreshold {
            threshold: 60,
            actions: vec![Action::log("log_high", LogLevel::High, message), Action::cancel()],
        },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::ActionKind;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        let more_packets = &config.defaults.more_packets;

        assert!(more_packets.enabled);
        assert_eq!(more_packets.rate.allowed_rate_per_second, 22);
        assert_eq!(more_packets.rate.buffer_limit, 30);
        assert_eq!(more_packets.violation.decay, 0.8);
        assert_eq!(config.clock.ticks_per_window, 20);
        assert_eq!(config.reload_policy, ReloadPolicy::PreserveSetbacks);
        assert_eq!(more_packets.actions.thresholds().len(), 3);
    }

    #[test]
    fn test_world_override() {
        let json = r#"{
            "worlds": {
                "nether": {"more_packets": {"rate": {"allowed_rate_per_second": 30}}}
            }
        }"#;
        let config = EngineConfig::from_json(json).unwrap();

        let nether = config.for_world("nether");
        assert_eq!(nether.more_packets.rate.allowed_rate_per_second, 30);
        assert_eq!(nether.more_packets.rate.buffer_limit, 30);
        assert_eq!(config.for_world("world").more_packets.rate.allowed_rate_per_second, 22);
    }

    #[test]
    fn test_reload_policy_parsing() {
        let config = EngineConfig::from_json(r#"{"reload_policy": "clear_all"}"#).unwrap();
        assert_eq!(config.reload_policy, ReloadPolicy::ClearAll);
    }

    #[test]
    fn test_invalid_decay_rejected() {
        let json = r#"{"defaults": {"more_packets": {"violation": {"decay": 1.5}}}}"#;
        match EngineConfig::from_json(json) {
            Err(ConfigError::Invalid(message)) => assert!(message.contains("decay")),
            other => panic!("Expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_world_rejected() {
        let json = r#"{"worlds": {"end": {"more_packets": {"rate": {"buffer_limit": 0}}}}}"#;
        match EngineConfig::from_json(json) {
            Err(ConfigError::Invalid(message)) => assert!(message.starts_with("end")),
            other => panic!("Expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(EngineConfig::from_json("{not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let path = Path::new("/definitely/not/here/engine.json");
        match EngineConfig::load(path) {
            Err(ConfigError::Io { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("Expected io error, got {:?}", other),
        }
    }

    #[test]
    fn test_default_actions_cancel_at_every_tier() {
        let actions = default_more_packets_actions();
        for tier in actions.thresholds() {
            assert!(tier.actions.iter().any(|a| a.kind == ActionKind::Cancel));
        }
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = EngineConfig::from_json(&json).unwrap();
        assert_eq!(back.sweep_idle(), Duration::from_secs(60));
        assert_eq!(back.defaults.more_packets.actions, config.defaults.more_packets.actions);
    }
}
