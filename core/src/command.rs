//! The closed catalog of player and system intents.
//!
//! Variants are appended, never removed or reordered.

use crate::{message::Message, types::EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum GameCommand {
    // ── Roster ────────────────────────────────────
    RecruitAdventurer {
        name: String,
    },
    DismissAdventurer {
        adventurer_id: EntityId,
    },

    // ── Missions ──────────────────────────────────
    StartMission {
        mission_id:     EntityId,
        adventurer_ids: Vec<EntityId>,
    },
    /// Issued by the mission sweep on every tick.
    ResolveMissions,

    // ── Facilities and economy ────────────────────
    UpgradeFacility {
        facility_id: EntityId,
    },
    AccrueResources {
        elapsed_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameCommandKind {
    RecruitAdventurer,
    DismissAdventurer,
    StartMission,
    ResolveMissions,
    UpgradeFacility,
    AccrueResources,
}

impl GameCommandKind {
    /// Stable name, identical to the serialized `type` tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecruitAdventurer => "recruit_adventurer",
            Self::DismissAdventurer => "dismiss_adventurer",
            Self::StartMission      => "start_mission",
            Self::ResolveMissions   => "resolve_missions",
            Self::UpgradeFacility   => "upgrade_facility",
            Self::AccrueResources   => "accrue_resources",
        }
    }
}

impl fmt::Display for GameCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message for GameCommand {
    type Kind = GameCommandKind;

    fn kind(&self) -> GameCommandKind {
        match self {
            Self::RecruitAdventurer { .. } => GameCommandKind::RecruitAdventurer,
            Self::DismissAdventurer { .. } => GameCommandKind::DismissAdventurer,
            Self::StartMission { .. }      => GameCommandKind::StartMission,
            Self::ResolveMissions          => GameCommandKind::ResolveMissions,
            Self::UpgradeFacility { .. }   => GameCommandKind::UpgradeFacility,
            Self::AccrueResources { .. }   => GameCommandKind::AccrueResources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_serialized_tag() {
        let commands = [
            GameCommand::RecruitAdventurer { name: "Ash".into() },
            GameCommand::DismissAdventurer { adventurer_id: "adv-1".into() },
            GameCommand::StartMission {
                mission_id:     "goblin_cave".into(),
                adventurer_ids: vec!["adv-1".into()],
            },
            GameCommand::ResolveMissions,
            GameCommand::UpgradeFacility { facility_id: "tavern".into() },
            GameCommand::AccrueResources { elapsed_ms: 1000 },
        ];
        for command in commands {
            let json = serde_json::to_value(&command).unwrap();
            assert_eq!(json["type"], command.kind().as_str());
        }
    }

    #[test]
    fn unit_command_parses_without_payload() {
        let parsed: GameCommand = serde_json::from_str(r#"{"type":"resolve_missions"}"#).unwrap();
        assert_eq!(parsed, GameCommand::ResolveMissions);
    }
}
