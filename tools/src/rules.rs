//! Command handlers for the guild.
//!
//! Each rule reads the current state and returns a full replacement plus
//! the events it produced. A rule that rejects a command returns an error,
//! which the bus reports as `CommandFailed`; the state is left alone.

use crate::{
    guild::{ActiveMission, Adventurer, GuildConfig, GuildState},
    rng::GuildRng,
};
use anyhow::{bail, ensure};
use chrono::Duration as ChronoDuration;
use guildhall_core::{
    command::{GameCommand, GameCommandKind},
    command_bus::{CommandBus, CommandContext, CommandOutcome},
    error::SimResult,
    event::GameEvent,
    message::{Envelope, Metadata},
};
use std::{collections::HashSet, sync::Arc};

pub type GuildCommands = CommandBus<GuildState, GameCommand, GameEvent>;

type Outcome = anyhow::Result<CommandOutcome<GuildState, GameEvent>>;
type Rule = fn(&GuildConfig, &GuildState, GameCommand, &CommandContext) -> Outcome;

pub fn register_rules(commands: &GuildCommands, config: Arc<GuildConfig>) -> SimResult<()> {
    let rules: [(GameCommandKind, Rule); 6] = [
        (GameCommandKind::RecruitAdventurer, recruit),
        (GameCommandKind::DismissAdventurer, dismiss),
        (GameCommandKind::StartMission, start_mission),
        (GameCommandKind::ResolveMissions, resolve_missions),
        (GameCommandKind::UpgradeFacility, upgrade_facility),
        (GameCommandKind::AccrueResources, accrue_resources),
    ];
    for (kind, rule) in rules {
        bind(commands, kind, &config, rule)?;
    }
    log::debug!("Registered {} guild rules", rules.len());
    Ok(())
}

fn bind(
    commands: &GuildCommands,
    kind: GameCommandKind,
    config: &Arc<GuildConfig>,
    rule: Rule,
) -> SimResult<()> {
    let config = Arc::clone(config);
    commands.register(
        kind,
        move |command: GameCommand, state: Arc<GuildState>, ctx: CommandContext| {
            let config = Arc::clone(&config);
            async move { rule(&config, &state, command, &ctx) }
        },
    )
}

/// Stamp an event with the command's time and carry its correlation id.
fn emit(ctx: &CommandContext, event: GameEvent) -> Envelope<GameEvent> {
    let envelope = Envelope::new(event, ctx.now);
    match &ctx.correlation_id {
        Some(id) => envelope.with_metadata(Metadata::for_correlation(id.clone())),
        None => envelope,
    }
}

// ── Roster ───────────────────────────────────────────────────────────────────

fn recruit(config: &GuildConfig, state: &GuildState, command: GameCommand, ctx: &CommandContext) -> Outcome {
    let GameCommand::RecruitAdventurer { name } = command else {
        bail!("expected recruit_adventurer");
    };
    let name = name.trim().to_string();
    ensure!(!name.is_empty(), "Adventurer name must not be empty");
    let cost = config.recruit_cost;
    ensure!(
        state.gold >= cost,
        "Not enough gold to recruit: need {cost}, have {}",
        state.gold
    );

    let mut next = state.clone();
    let adventurer_id = format!("adv-{:04}", next.next_adventurer);
    next.next_adventurer += 1;
    next.gold -= cost;
    next.adventurers.insert(
        adventurer_id.clone(),
        Adventurer {
            id:         adventurer_id.clone(),
            name:       name.clone(),
            level:      1,
            on_mission: None,
        },
    );

    Ok(CommandOutcome::new(
        next,
        vec![
            emit(ctx, GameEvent::ResourcesSpent { amount: cost, reason: "recruit".into() }),
            emit(ctx, GameEvent::AdventurerRecruited { adventurer_id, name }),
        ],
    ))
}

fn dismiss(_config: &GuildConfig, state: &GuildState, command: GameCommand, ctx: &CommandContext) -> Outcome {
    let GameCommand::DismissAdventurer { adventurer_id } = command else {
        bail!("expected dismiss_adventurer");
    };
    let Some(adventurer) = state.adventurers.get(&adventurer_id) else {
        bail!("Unknown adventurer: {adventurer_id}");
    };
    if let Some(mission_id) = &adventurer.on_mission {
        bail!("{} is away on {mission_id}", adventurer.name);
    }

    let mut next = state.clone();
    next.adventurers.remove(&adventurer_id);
    Ok(CommandOutcome::new(
        next,
        vec![emit(ctx, GameEvent::AdventurerDismissed { adventurer_id })],
    ))
}

// ── Missions ─────────────────────────────────────────────────────────────────

fn start_mission(config: &GuildConfig, state: &GuildState, command: GameCommand, ctx: &CommandContext) -> Outcome {
    let GameCommand::StartMission { mission_id, adventurer_ids } = command else {
        bail!("expected start_mission");
    };
    let Some(template) = config.mission(&mission_id) else {
        bail!("Unknown mission: {mission_id}");
    };
    ensure!(
        !state.missions.contains_key(&mission_id),
        "Mission {mission_id} is already under way"
    );
    ensure!(
        adventurer_ids.len() >= template.min_party,
        "{} needs at least {} adventurer(s)",
        template.name,
        template.min_party
    );
    let mut seen = HashSet::new();
    for id in &adventurer_ids {
        ensure!(seen.insert(id), "Adventurer {id} listed twice");
        let Some(adventurer) = state.adventurers.get(id) else {
            bail!("Unknown adventurer: {id}");
        };
        if let Some(busy) = &adventurer.on_mission {
            bail!("{} is already on {busy}", adventurer.name);
        }
    }

    let ends_at = ctx.now + ChronoDuration::milliseconds(template.duration_ms as i64);
    let mut next = state.clone();
    for id in &adventurer_ids {
        if let Some(adventurer) = next.adventurers.get_mut(id) {
            adventurer.on_mission = Some(mission_id.clone());
        }
    }
    next.missions.insert(
        mission_id.clone(),
        ActiveMission {
            mission_id:     mission_id.clone(),
            adventurer_ids: adventurer_ids.clone(),
            started_at:     ctx.now,
            ends_at,
        },
    );

    Ok(CommandOutcome::new(
        next,
        vec![emit(ctx, GameEvent::MissionStarted { mission_id, adventurer_ids, ends_at })],
    ))
}

/// Complete every mission due at the command's time. Runs on every tick,
/// so the common case is a no-op that leaves the state as it was.
fn resolve_missions(config: &GuildConfig, state: &GuildState, command: GameCommand, ctx: &CommandContext) -> Outcome {
    let GameCommand::ResolveMissions = command else {
        bail!("expected resolve_missions");
    };
    let due: Vec<&ActiveMission> = state
        .missions
        .values()
        .filter(|mission| mission.ends_at <= ctx.now)
        .collect();
    if due.is_empty() {
        return Ok(CommandOutcome::new(state.clone(), Vec::new()));
    }

    let mut next = state.clone();
    let mut events = Vec::new();
    let mut earned = 0u64;
    for mission in due {
        let reward = match config.mission(&mission.mission_id) {
            Some(template) => GuildRng::new(next.seed, next.mission_seq)
                .roll_between(template.reward_min, template.reward_max),
            None => {
                log::warn!("Mission {} no longer configured; no reward", mission.mission_id);
                0
            }
        };
        next.mission_seq += 1;
        next.missions_completed += 1;
        next.missions.remove(&mission.mission_id);
        for id in &mission.adventurer_ids {
            if let Some(adventurer) = next.adventurers.get_mut(id) {
                adventurer.on_mission = None;
                adventurer.level += 1;
            }
        }
        earned += reward;
        events.push(emit(
            ctx,
            GameEvent::MissionCompleted {
                mission_id:     mission.mission_id.clone(),
                adventurer_ids: mission.adventurer_ids.clone(),
                reward,
            },
        ));
    }

    next.gold += earned;
    if earned > 0 {
        events.push(emit(
            ctx,
            GameEvent::ResourcesChanged { gold_delta: earned as i64, gold: next.gold },
        ));
    }
    Ok(CommandOutcome::new(next, events))
}

// ── Facilities and economy ───────────────────────────────────────────────────

fn upgrade_facility(config: &GuildConfig, state: &GuildState, command: GameCommand, ctx: &CommandContext) -> Outcome {
    let GameCommand::UpgradeFacility { facility_id } = command else {
        bail!("expected upgrade_facility");
    };
    let Some(&level) = state.facilities.get(&facility_id) else {
        bail!("Unknown facility: {facility_id}");
    };
    let cost = config.upgrade_cost(level);
    ensure!(
        state.gold >= cost,
        "Not enough gold to upgrade {facility_id}: need {cost}, have {}",
        state.gold
    );

    let mut next = state.clone();
    next.gold -= cost;
    next.facilities.insert(facility_id.clone(), level + 1);
    Ok(CommandOutcome::new(
        next,
        vec![
            emit(ctx, GameEvent::ResourcesSpent { amount: cost, reason: format!("upgrade {facility_id}") }),
            emit(ctx, GameEvent::FacilityUpgraded { facility_id, level: level + 1 }),
        ],
    ))
}

/// Passive income. Sub-second remainders carry over to the next call,
/// so many short ticks pay the same as one long one.
fn accrue_resources(config: &GuildConfig, state: &GuildState, command: GameCommand, ctx: &CommandContext) -> Outcome {
    let GameCommand::AccrueResources { elapsed_ms } = command else {
        bail!("expected accrue_resources");
    };
    let total_ms = state.income_carry_ms + elapsed_ms;
    let whole_secs = total_ms / 1000;
    let gold_delta = whole_secs * state.income_per_sec(config);

    let mut next = state.clone();
    next.income_carry_ms = total_ms % 1000;
    if gold_delta == 0 {
        return Ok(CommandOutcome::new(next, Vec::new()));
    }
    next.gold += gold_delta;
    let gold = next.gold;
    Ok(CommandOutcome::new(
        next,
        vec![emit(ctx, GameEvent::ResourcesChanged { gold_delta: gold_delta as i64, gold })],
    ))
}
