//! Engine configuration, loaded from `<data_dir>/engine.json`.
//!
//! Every field has a default, so a partial file (or no file) is valid.

use crate::{
    error::{SimError, SimResult},
    persistence::DEFAULT_DEBOUNCE_MS,
    tick_bus::DEFAULT_TICK_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

pub const CONFIG_FILE: &str = "engine.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Live tick period, also the replay tick size.
    pub tick_interval_ms:        u64,
    /// Quiet window before a debounced save fires.
    pub debounce_ms:             u64,
    /// Deadline per command handler; `null` disables it.
    pub command_timeout_ms:      Option<u64>,
    /// Deadline per tick handler invocation; `null` disables it.
    pub tick_handler_timeout_ms: Option<u64>,
    pub replay_on_start:         bool,
    /// Upper bound on replayed offline time; `null` replays everything.
    pub max_replay_ms:           Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms:        DEFAULT_TICK_INTERVAL_MS,
            debounce_ms:             DEFAULT_DEBOUNCE_MS,
            command_timeout_ms:      Some(30_000),
            tick_handler_timeout_ms: Some(30_000),
            replay_on_start:         true,
            max_replay_ms:           None,
        }
    }
}

impl EngineConfig {
    pub fn load(data_dir: &str) -> SimResult<Self> {
        let path = Path::new(data_dir).join(CONFIG_FILE);
        if !path.exists() {
            log::warn!("{} not found, using default engine config", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_json(&content)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> SimResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.tick_interval_ms == 0 {
            return Err(SimError::Config("tick_interval_ms must be greater than zero".into()));
        }
        if self.command_timeout_ms == Some(0) || self.tick_handler_timeout_ms == Some(0) {
            return Err(SimError::Config("handler timeouts must be greater than zero".into()));
        }
        Ok(())
    }

    /// Short windows so timer-driven tests finish quickly.
    pub fn default_test() -> Self {
        Self {
            debounce_ms:             50,
            command_timeout_ms:      Some(1_000),
            tick_handler_timeout_ms: Some(1_000),
            ..Self::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }

    pub fn tick_handler_timeout(&self) -> Option<Duration> {
        self.tick_handler_timeout_ms.map(Duration::from_millis)
    }
}
