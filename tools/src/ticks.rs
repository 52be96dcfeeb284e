//! Tick handlers that turn elapsed time into guild commands.
//!
//! They run the same way for live ticks and offline replay. Commands are
//! stamped with the tick's own time, so a replayed tick resolves missions
//! as of the moment it stands for, not as of now.

use crate::rules::GuildCommands;
use chrono::{DateTime, Utc};
use guildhall_core::{
    command::GameCommand,
    message::Envelope,
    tick_bus::{TickBus, TickHandler},
    types::DeltaMs,
    Subscription,
};

/// Completes every mission whose end time has passed.
pub fn mission_sweep(commands: GuildCommands) -> impl TickHandler + 'static {
    move |_delta_ms: DeltaMs, at: DateTime<Utc>| {
        let commands = commands.clone();
        async move {
            commands.dispatch(Envelope::new(GameCommand::ResolveMissions, at)).await;
            anyhow::Ok(())
        }
    }
}

/// Pays passive income for the time the tick covers.
pub fn passive_income(commands: GuildCommands) -> impl TickHandler + 'static {
    move |delta_ms: DeltaMs, at: DateTime<Utc>| {
        let commands = commands.clone();
        async move {
            let command = GameCommand::AccrueResources { elapsed_ms: delta_ms };
            commands.dispatch(Envelope::new(command, at)).await;
            anyhow::Ok(())
        }
    }
}

pub fn subscribe_all(ticks: &TickBus, commands: &GuildCommands) -> Vec<Subscription> {
    vec![
        ticks.subscribe(mission_sweep(commands.clone())),
        ticks.subscribe(passive_income(commands.clone())),
    ]
}
