//! The demo game driven by the runner: a guild of adventurers.
//!
//! State is one serializable value. The engine owns it; rules in
//! `rules.rs` produce replacements for it.

use chrono::{DateTime, Utc};
use guildhall_core::{
    error::{SimError, SimResult},
    types::EntityId,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};

pub const CONFIG_FILE: &str = "guild.json";

// ── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionTemplate {
    pub id:          EntityId,
    pub name:        String,
    pub duration_ms: u64,
    pub min_party:   usize,
    pub reward_min:  u64,
    pub reward_max:  u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    pub starting_gold:       u64,
    pub recruit_cost:        u64,
    /// Upgrading from level L costs `upgrade_base_cost * (L + 1)`.
    pub upgrade_base_cost:   u64,
    /// Gold per second before tavern bonuses.
    pub base_income_per_sec: u64,
    pub starter_roster:      usize,
    pub facilities:          Vec<EntityId>,
    pub missions:            Vec<MissionTemplate>,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            starting_gold:       300,
            recruit_cost:        50,
            upgrade_base_cost:   100,
            base_income_per_sec: 1,
            starter_roster:      3,
            facilities:          vec!["tavern".into(), "barracks".into(), "forge".into()],
            missions:            vec![MissionTemplate {
                id:          "rat_cellar".into(),
                name:        "Clear the Rat Cellar".into(),
                duration_ms: 30_000,
                min_party:   1,
                reward_min:  20,
                reward_max:  40,
            }],
        }
    }
}

impl GuildConfig {
    pub fn load(data_dir: &str) -> SimResult<Self> {
        let path = Path::new(data_dir).join(CONFIG_FILE);
        if !path.exists() {
            log::warn!("{} not found, using default guild config", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&content)?;
        if config.missions.iter().any(|m| m.min_party == 0) {
            return Err(SimError::Config("mission min_party must be at least 1".into()));
        }
        log::info!(
            "Loaded guild config from {} ({} missions)",
            path.display(),
            config.missions.len()
        );
        Ok(config)
    }

    pub fn mission(&self, id: &str) -> Option<&MissionTemplate> {
        self.missions.iter().find(|m| m.id == id)
    }

    pub fn upgrade_cost(&self, current_level: u32) -> u64 {
        self.upgrade_base_cost * (u64::from(current_level) + 1)
    }
}

// ── State ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adventurer {
    pub id:         EntityId,
    pub name:       String,
    pub level:      u32,
    pub on_mission: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveMission {
    pub mission_id:     EntityId,
    pub adventurer_ids: Vec<EntityId>,
    pub started_at:     DateTime<Utc>,
    pub ends_at:        DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildState {
    pub gold:               u64,
    pub next_adventurer:    u64,
    pub adventurers:        BTreeMap<EntityId, Adventurer>,
    /// Facility id → level. Every configured facility starts at 0.
    pub facilities:         BTreeMap<EntityId, u32>,
    /// Keyed by mission template id; one run of each template at a time.
    pub missions:           BTreeMap<EntityId, ActiveMission>,
    pub missions_completed: u64,
    pub seed:               u64,
    /// Loot stream index, advanced once per completed mission.
    pub mission_seq:        u64,
    /// Income time not yet worth a whole second.
    pub income_carry_ms:    u64,
}

impl GuildState {
    pub fn new(config: &GuildConfig, seed: u64) -> Self {
        Self {
            gold:               config.starting_gold,
            next_adventurer:    1,
            adventurers:        BTreeMap::new(),
            facilities:         config.facilities.iter().map(|id| (id.clone(), 0)).collect(),
            missions:           BTreeMap::new(),
            missions_completed: 0,
            seed,
            mission_seq:        0,
            income_carry_ms:    0,
        }
    }

    pub fn facility_level(&self, facility_id: &str) -> u32 {
        self.facilities.get(facility_id).copied().unwrap_or(0)
    }

    /// Gold per second: the base rate plus one per tavern level.
    pub fn income_per_sec(&self, config: &GuildConfig) -> u64 {
        config.base_income_per_sec + u64::from(self.facility_level("tavern"))
    }

    pub fn idle_adventurers(&self) -> impl Iterator<Item = &Adventurer> {
        self.adventurers.values().filter(|a| a.on_mission.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_guild_has_every_facility_at_level_zero() {
        let config = GuildConfig::default();
        let state = GuildState::new(&config, 7);
        assert_eq!(state.gold, config.starting_gold);
        assert_eq!(state.facilities.len(), 3);
        assert!(state.facilities.values().all(|level| *level == 0));
        assert_eq!(state.income_per_sec(&config), 1);
    }

    #[test]
    fn upgrade_cost_grows_with_level() {
        let config = GuildConfig::default();
        assert_eq!(config.upgrade_cost(0), 100);
        assert_eq!(config.upgrade_cost(2), 300);
    }

    #[test]
    fn shipped_guild_config_loads() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");
        let config = GuildConfig::load(dir).unwrap();
        assert!(config.mission("goblin_road").is_some());
        assert_eq!(config.recruit_cost, 50);
    }

    #[test]
    fn state_survives_a_json_round_trip() {
        let state = GuildState::new(&GuildConfig::default(), 99);
        let json = serde_json::to_string(&state).unwrap();
        let back: GuildState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
