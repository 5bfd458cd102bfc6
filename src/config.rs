//! Runtime configuration: one JSON document with a section per component,
//! every field defaulted, plus a few environment overrides.

use std::env;
use std::fs;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dqn::AgentConfig;
use crate::log::LogConfig;
use crate::player::PlayerConfig;
use crate::reward::RewardConfig;

pub const CONFIG_ENV: &str = "AUTOPILOT_CONFIG";
pub const DB_ENV: &str = "AUTOPILOT_DB";
pub const SEED_ENV: &str = "AUTOPILOT_SEED";
pub const LOG_FILE_ENV: &str = "AUTOPILOT_LOG_FILE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<String>, // SQLite file; None = in-memory only
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: Some("autopilot.db".into()) }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub agent: AgentConfig,
    pub rewards: RewardConfig,
    pub player: PlayerConfig,
    pub storage: StorageConfig,
    pub log: LogConfig,
}

impl AutopilotConfig {
    /// Defaults, then the JSON file named by `AUTOPILOT_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => {
                let text = fs::read_to_string(&path).with_context(|| format!("reading config {path}"))?;
                Self::from_json(&text).with_context(|| format!("parsing config {path}"))?
            }
            _ => Self::default(),
        };
        cfg.apply_overrides(|name| env::var(name).ok());
        Ok(cfg)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Empty `AUTOPILOT_DB` / `AUTOPILOT_LOG_FILE` disable the file.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(DB_ENV) {
            self.storage.path = (!path.is_empty()).then_some(path);
        }
        if let Some(path) = var(LOG_FILE_ENV) {
            self.log.file = (!path.is_empty()).then_some(path);
        }
        if let Some(raw) = var(SEED_ENV) {
            match raw.parse::<u64>() {
                Ok(seed) => {
                    self.agent.seed = Some(seed);
                    self.player.seed = Some(seed.wrapping_add(1));
                }
                Err(_) => warn!(value = %raw, "ignoring invalid {SEED_ENV}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn empty_document_is_all_defaults() {
        let cfg = AutopilotConfig::from_json("{}").unwrap();
        assert_eq!(cfg.agent.hidden, AgentConfig::default().hidden);
        assert_eq!(cfg.storage.path.as_deref(), Some("autopilot.db"));
        assert_eq!(cfg.log, LogConfig::default());
    }

    #[test]
    fn nested_sections_merge_with_defaults() {
        let cfg = AutopilotConfig::from_json(
            r#"{"agent":{"batch_size":16,"gamma":0.9},"player":{"think_period_ms":250},"rewards":{"win_game":500}}"#,
        )
        .unwrap();
        assert_eq!(cfg.agent.batch_size, 16);
        assert!((cfg.agent.gamma - 0.9).abs() < 1e-6);
        assert_eq!(cfg.agent.capacity, AgentConfig::default().capacity);
        assert_eq!(cfg.player.think_period_ms, 250);
        assert_eq!(cfg.rewards.win_game, 500.0);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(AutopilotConfig::from_json(r#"{"agent":{"gamma":"high"}}"#).is_err());
    }

    #[test]
    fn env_overrides_apply_and_bad_values_are_ignored() {
        let mut cfg = AutopilotConfig::default();
        cfg.apply_overrides(vars(&[(DB_ENV, "/tmp/x.db"), (SEED_ENV, "42"), (LOG_FILE_ENV, "")]));
        assert_eq!(cfg.storage.path.as_deref(), Some("/tmp/x.db"));
        assert_eq!(cfg.agent.seed, Some(42));
        assert_eq!(cfg.player.seed, Some(43));
        assert_eq!(cfg.log.file, None);

        cfg.apply_overrides(vars(&[(SEED_ENV, "soon")]));
        assert_eq!(cfg.agent.seed, Some(42));
    }
}
