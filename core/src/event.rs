//! The closed catalog of domain events: facts that happened.
//!
//! RULE: Systems react to events; they never read each other's internals.
//! Variants are appended, never removed or reordered.

use crate::{
    message::{DomainEvent, Message},
    persistence::PersistencePolicy,
    types::EntityId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GameEvent {
    // ── Roster ────────────────────────────────────
    AdventurerRecruited {
        adventurer_id: EntityId,
        name:          String,
    },
    AdventurerDismissed {
        adventurer_id: EntityId,
    },

    // ── Missions ──────────────────────────────────
    MissionStarted {
        mission_id:     EntityId,
        adventurer_ids: Vec<EntityId>,
        ends_at:        DateTime<Utc>,
    },
    MissionCompleted {
        mission_id:     EntityId,
        adventurer_ids: Vec<EntityId>,
        reward:         u64,
    },

    // ── Facilities and economy ────────────────────
    FacilityUpgraded {
        facility_id: EntityId,
        level:       u32,
    },
    ResourcesSpent {
        amount: u64,
        reason: String,
    },
    ResourcesChanged {
        gold_delta: i64,
        gold:       u64,
    },

    // ── Bus ───────────────────────────────────────
    CommandFailed {
        command_type: String,
        reason:       String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    AdventurerRecruited,
    AdventurerDismissed,
    MissionStarted,
    MissionCompleted,
    FacilityUpgraded,
    ResourcesSpent,
    ResourcesChanged,
    CommandFailed,
}

impl GameEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdventurerRecruited => "adventurer_recruited",
            Self::AdventurerDismissed => "adventurer_dismissed",
            Self::MissionStarted      => "mission_started",
            Self::MissionCompleted    => "mission_completed",
            Self::FacilityUpgraded    => "facility_upgraded",
            Self::ResourcesSpent      => "resources_spent",
            Self::ResourcesChanged    => "resources_changed",
            Self::CommandFailed       => "command_failed",
        }
    }
}

impl fmt::Display for GameEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message for GameEvent {
    type Kind = GameEventKind;

    fn kind(&self) -> GameEventKind {
        match self {
            Self::AdventurerRecruited { .. } => GameEventKind::AdventurerRecruited,
            Self::AdventurerDismissed { .. } => GameEventKind::AdventurerDismissed,
            Self::MissionStarted { .. }      => GameEventKind::MissionStarted,
            Self::MissionCompleted { .. }    => GameEventKind::MissionCompleted,
            Self::FacilityUpgraded { .. }    => GameEventKind::FacilityUpgraded,
            Self::ResourcesSpent { .. }      => GameEventKind::ResourcesSpent,
            Self::ResourcesChanged { .. }    => GameEventKind::ResourcesChanged,
            Self::CommandFailed { .. }       => GameEventKind::CommandFailed,
        }
    }
}

impl DomainEvent for GameEvent {
    fn command_failed(command_type: String, reason: String) -> Self {
        Self::CommandFailed { command_type, reason }
    }
}

impl GameEvent {
    /// Which facts are written to storage, and how eagerly.
    ///
    /// Player-committed changes save immediately. Automatic, frequent
    /// changes (completion sweeps, income ticks) share the debounce timer.
    /// `CommandFailed` changes nothing and is never saved.
    pub fn persistence_policy() -> PersistencePolicy<GameEventKind> {
        PersistencePolicy::new()
            .immediate([
                GameEventKind::AdventurerRecruited,
                GameEventKind::AdventurerDismissed,
                GameEventKind::MissionStarted,
                GameEventKind::FacilityUpgraded,
                GameEventKind::ResourcesSpent,
            ])
            .debounced([
                GameEventKind::MissionCompleted,
                GameEventKind::ResourcesChanged,
            ])
    }
}
