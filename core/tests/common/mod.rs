//! A tiny counter catalog shared by the bus tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use guildhall_core::{
    clock::{Clock, ManualClock},
    command_bus::{CommandBus, CommandContext, CommandOutcome},
    event_bus::DomainEventBus,
    message::{DomainEvent, Envelope, Message},
    persistence::PersistencePolicy,
    state::StateCell,
};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq)]
pub enum TestCommand {
    Increment,
    Add { amount: u64 },
    Fail,
    Hang,
    Explode,
    Unhandled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestCommandKind {
    Increment,
    Add,
    Fail,
    Hang,
    Explode,
    Unhandled,
}

impl fmt::Display for TestCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Increment => "Increment",
            Self::Add       => "Add",
            Self::Fail      => "Fail",
            Self::Hang      => "Hang",
            Self::Explode   => "Explode",
            Self::Unhandled => "Unhandled",
        };
        f.write_str(name)
    }
}

impl Message for TestCommand {
    type Kind = TestCommandKind;

    fn kind(&self) -> TestCommandKind {
        match self {
            Self::Increment => TestCommandKind::Increment,
            Self::Add { .. } => TestCommandKind::Add,
            Self::Fail => TestCommandKind::Fail,
            Self::Hang => TestCommandKind::Hang,
            Self::Explode => TestCommandKind::Explode,
            Self::Unhandled => TestCommandKind::Unhandled,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    Counted { value: u64 },
    Immediate,
    Debounced,
    Ignored,
    CommandFailed { command_type: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestEventKind {
    Counted,
    Immediate,
    Debounced,
    Ignored,
    CommandFailed,
}

impl fmt::Display for TestEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Message for TestEvent {
    type Kind = TestEventKind;

    fn kind(&self) -> TestEventKind {
        match self {
            Self::Counted { .. } => TestEventKind::Counted,
            Self::Immediate => TestEventKind::Immediate,
            Self::Debounced => TestEventKind::Debounced,
            Self::Ignored => TestEventKind::Ignored,
            Self::CommandFailed { .. } => TestEventKind::CommandFailed,
        }
    }
}

impl DomainEvent for TestEvent {
    fn command_failed(command_type: String, reason: String) -> Self {
        Self::CommandFailed { command_type, reason }
    }
}

pub fn policy() -> PersistencePolicy<TestEventKind> {
    PersistencePolicy::new()
        .immediate([TestEventKind::Immediate])
        .debounced([TestEventKind::Debounced])
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

pub fn envelope<M: Message>(message: M) -> Envelope<M> {
    Envelope::new(message, epoch())
}

/// A command bus over a `u64` counter, with all test handlers registered
/// except `Unhandled`.
pub struct CounterBus {
    pub state:    StateCell<u64>,
    pub events:   DomainEventBus<TestEvent>,
    pub commands: CommandBus<u64, TestCommand, TestEvent>,
}

pub fn counter_bus(timeout: Option<Duration>) -> CounterBus {
    let state = StateCell::new(0u64);
    let events: DomainEventBus<TestEvent> = DomainEventBus::new();
    let clock: Arc<dyn Clock> = manual_clock();
    let commands: CommandBus<u64, TestCommand, TestEvent> =
        CommandBus::new(state.clone(), events.clone(), clock, timeout);

    commands.register(TestCommandKind::Increment, increment).unwrap();
    commands.register(TestCommandKind::Add, add).unwrap();
    commands.register(TestCommandKind::Fail, fail).unwrap();
    commands.register(TestCommandKind::Hang, hang).unwrap();
    commands.register(TestCommandKind::Explode, explode).unwrap();

    CounterBus { state, events, commands }
}

pub async fn increment(
    _command: TestCommand,
    state: Arc<u64>,
    ctx: CommandContext,
) -> anyhow::Result<CommandOutcome<u64, TestEvent>> {
    let value = *state + 1;
    Ok(CommandOutcome::new(
        value,
        vec![Envelope::new(TestEvent::Counted { value }, ctx.now)],
    ))
}

/// Yields mid-handler so any interleaving would be visible.
pub async fn add(
    command: TestCommand,
    state: Arc<u64>,
    ctx: CommandContext,
) -> anyhow::Result<CommandOutcome<u64, TestEvent>> {
    let TestCommand::Add { amount } = command else {
        anyhow::bail!("expected Add");
    };
    tokio::task::yield_now().await;
    let value = *state + amount;
    Ok(CommandOutcome::new(
        value,
        vec![Envelope::new(TestEvent::Counted { value }, ctx.now)],
    ))
}

pub async fn fail(
    _command: TestCommand,
    _state: Arc<u64>,
    _ctx: CommandContext,
) -> anyhow::Result<CommandOutcome<u64, TestEvent>> {
    anyhow::bail!("not enough gold")
}

pub async fn hang(
    _command: TestCommand,
    _state: Arc<u64>,
    _ctx: CommandContext,
) -> anyhow::Result<CommandOutcome<u64, TestEvent>> {
    std::future::pending().await
}

pub async fn explode(
    _command: TestCommand,
    _state: Arc<u64>,
    _ctx: CommandContext,
) -> anyhow::Result<CommandOutcome<u64, TestEvent>> {
    panic!("handler exploded")
}

/// Collects every envelope of one kind published on `events`.
pub fn record(
    events: &DomainEventBus<TestEvent>,
    kind: TestEventKind,
) -> Arc<Mutex<Vec<Envelope<TestEvent>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = events.subscribe(kind, move |event: Envelope<TestEvent>| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(event);
            anyhow::Ok(())
        }
    });
    seen
}

pub fn failures(seen: &Arc<Mutex<Vec<Envelope<TestEvent>>>>) -> Vec<(String, String)> {
    seen.lock()
        .unwrap()
        .iter()
        .filter_map(|event| match &event.message {
            TestEvent::CommandFailed { command_type, reason } => {
                Some((command_type.clone(), reason.clone()))
            }
            _ => None,
        })
        .collect()
}
