//! The simulation engine: wires the buses around one state cell.
//!
//! WIRING (built once per game session, never a process-wide singleton):
//!   1. State cell         the only shared mutable value
//!   2. Domain event bus   facts fan out from here
//!   3. Command bus        sole writer of the state cell
//!   4. Tick bus           live heartbeat and offline replay
//!   5. Persistence bus    subscribed to the event bus at construction
//!
//! LIFECYCLE:
//!   Cold start: load the save, measure time since last played, and replay
//!   it as ticks so tick handlers fast-forward the world.
//!   Warm running: state changes only through dispatched commands.
//!
//! Register command handlers and subscribe tick handlers before `start()`,
//! otherwise the replayed ticks reach nobody.

use crate::{
    clock::Clock,
    command_bus::{CommandBus, DispatchReceipt},
    config::EngineConfig,
    error::SimResult,
    event_bus::DomainEventBus,
    message::{DomainEvent, Envelope, Message},
    persistence::{PersistenceBus, PersistencePolicy, StorageAdapter},
    state::StateCell,
    tick_bus::TickBus,
};
use std::sync::Arc;

/// What happened during `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColdStart {
    /// A saved state was found and adopted.
    pub restored:    bool,
    /// Wall-clock time since the last save, zero if unknown or in the future.
    pub offline_ms:  u64,
    /// Offline time actually replayed as ticks.
    pub replayed_ms: u64,
}

pub struct SimEngine<S, C: Message, E: DomainEvent> {
    config:      EngineConfig,
    clock:       Arc<dyn Clock>,
    state:       StateCell<S>,
    events:      DomainEventBus<E>,
    commands:    CommandBus<S, C, E>,
    ticks:       TickBus,
    persistence: PersistenceBus<S>,
}

impl<S, C, E> SimEngine<S, C, E>
where
    S: Send + Sync + 'static,
    C: Message,
    E: DomainEvent,
{
    /// Wire a new session. Fails if `config` does not validate.
    pub fn new(
        initial: S,
        storage: Arc<dyn StorageAdapter<S>>,
        policy: &PersistencePolicy<E::Kind>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> SimResult<Self> {
        config.validate()?;
        let state = StateCell::new(initial);
        let events = DomainEventBus::new();
        let commands = CommandBus::new(
            state.clone(),
            events.clone(),
            Arc::clone(&clock),
            config.command_timeout(),
        );
        let ticks = TickBus::new(
            Arc::clone(&clock),
            config.tick_interval(),
            config.tick_handler_timeout(),
        );
        let persistence = PersistenceBus::new(
            storage,
            state.clone(),
            &events,
            policy,
            Arc::clone(&clock),
            config.debounce(),
        );

        Ok(Self { config, clock, state, events, commands, ticks, persistence })
    }

    /// Cold start: restore the save and replay offline time.
    pub async fn start(&self) -> SimResult<ColdStart> {
        let mut report = ColdStart::default();

        match self.persistence.load()? {
            Some(saved) => {
                self.state.set(saved);
                report.restored = true;
                log::info!("Restored saved game state");
            }
            None => log::info!("No saved game state, starting fresh"),
        }

        let Some(last_played) = self.persistence.last_played()? else {
            return Ok(report);
        };

        let elapsed = (self.clock.now() - last_played).num_milliseconds();
        if elapsed <= 0 {
            if elapsed < 0 {
                log::warn!("Last played time {last_played} is in the future; skipping replay");
            }
            return Ok(report);
        }
        report.offline_ms = elapsed as u64;

        if !self.config.replay_on_start {
            log::info!("Offline replay disabled; {} ms not replayed", report.offline_ms);
            return Ok(report);
        }

        let replay_ms = match self.config.max_replay_ms {
            Some(cap) if report.offline_ms > cap => {
                log::warn!("Offline time {} ms capped to {cap} ms", report.offline_ms);
                cap
            }
            _ => report.offline_ms,
        };

        self.ticks
            .replay_ticks(replay_ms, self.config.tick_interval_ms, Some(last_played))
            .await;
        report.replayed_ms = replay_ms;
        Ok(report)
    }

    /// Dispatch a command stamped with the engine clock.
    pub fn dispatch(&self, command: C) -> DispatchReceipt {
        self.commands.dispatch(Envelope::new(command, self.clock.now()))
    }

    /// Teardown hook: write out any pending debounced save.
    pub fn shutdown(&self) -> SimResult<()> {
        self.persistence.flush()
    }

    pub fn state(&self) -> Arc<S> {
        self.state.get()
    }

    /// Direct state replacement, bypassing the command bus.
    /// For tests and tooling.
    pub fn set_state(&self, next: S) {
        self.state.set(next);
    }

    pub fn commands(&self) -> &CommandBus<S, C, E> {
        &self.commands
    }

    pub fn events(&self) -> &DomainEventBus<E> {
        &self.events
    }

    pub fn ticks(&self) -> &TickBus {
        &self.ticks
    }

    pub fn persistence(&self) -> &PersistenceBus<S> {
        &self.persistence
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
