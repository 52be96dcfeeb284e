//! Engine wiring: cold start, offline catch-up, commands and saves end to end.

mod common;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::*;
use guildhall_core::{
    clock::ManualClock,
    command_bus::{CommandContext, CommandOutcome},
    config::EngineConfig,
    engine::{ColdStart, SimEngine},
    error::SimError,
    message::Envelope,
    persistence::{PersistencePolicy, StorageAdapter},
    store::{MemoryStorage, SqliteStorage},
    types::DeltaMs,
};
use std::sync::{Arc, Mutex};

type Engine = SimEngine<u64, TestCommand, TestEvent>;
type TickLog = Arc<Mutex<Vec<(DeltaMs, DateTime<Utc>)>>>;

fn ms(value: i64) -> ChronoDuration {
    ChronoDuration::milliseconds(value)
}

fn engine_with(
    storage: Arc<dyn StorageAdapter<u64>>,
    clock: &Arc<ManualClock>,
    config: EngineConfig,
    policy: PersistencePolicy<TestEventKind>,
) -> Engine {
    init_logging();
    let engine: Engine = SimEngine::new(0, storage, &policy, clock.clone(), config).unwrap();
    engine
        .commands()
        .register(TestCommandKind::Increment, increment)
        .unwrap();
    engine
}

fn record_ticks(engine: &Engine) -> TickLog {
    let seen: TickLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = engine.ticks().subscribe(move |delta_ms: DeltaMs, at: DateTime<Utc>| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push((delta_ms, at));
            anyhow::Ok(())
        }
    });
    seen
}

// ── Cold start ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn offline_gap_is_replayed_as_ticks() {
    let clock = manual_clock();
    let storage = Arc::new(MemoryStorage::with_save(40u64, epoch() - ms(5500)));
    let engine = engine_with(storage, &clock, EngineConfig::default_test(), policy());
    let ticks = record_ticks(&engine);

    let report = engine.start().await.unwrap();

    assert_eq!(
        report,
        ColdStart { restored: true, offline_ms: 5500, replayed_ms: 5500 }
    );
    assert_eq!(*engine.state(), 40);
    let ticks = ticks.lock().unwrap();
    assert_eq!(ticks.len(), 6);
    assert!(ticks[..5].iter().all(|(delta, _)| *delta == 1000));
    assert_eq!(ticks[5], (500, epoch()));
    assert_eq!(ticks[0].1, epoch() - ms(4500));
}

#[tokio::test]
async fn fresh_start_replays_nothing() {
    let clock = manual_clock();
    let engine = engine_with(
        Arc::new(MemoryStorage::<u64>::new()),
        &clock,
        EngineConfig::default_test(),
        policy(),
    );
    let ticks = record_ticks(&engine);

    let report = engine.start().await.unwrap();

    assert_eq!(report, ColdStart::default());
    assert_eq!(*engine.state(), 0);
    assert!(ticks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn zero_tick_interval_is_rejected_at_construction() {
    init_logging();
    let config = EngineConfig { tick_interval_ms: 0, ..EngineConfig::default_test() };
    let storage: Arc<dyn StorageAdapter<u64>> = Arc::new(MemoryStorage::<u64>::new());

    let built: Result<Engine, _> = SimEngine::new(0, storage, &policy(), manual_clock(), config);

    assert!(matches!(built, Err(SimError::Config(_))));
}

#[tokio::test]
async fn last_played_in_the_future_skips_replay() {
    let clock = manual_clock();
    let storage = Arc::new(MemoryStorage::with_save(3u64, epoch() + ms(60_000)));
    let engine = engine_with(storage, &clock, EngineConfig::default_test(), policy());
    let ticks = record_ticks(&engine);

    let report = engine.start().await.unwrap();

    assert!(report.restored);
    assert_eq!(report.offline_ms, 0);
    assert_eq!(report.replayed_ms, 0);
    assert_eq!(*engine.state(), 3);
    assert!(ticks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn replay_is_capped_by_max_replay_ms() {
    let clock = manual_clock();
    let storage = Arc::new(MemoryStorage::with_save(0u64, epoch() - ms(5500)));
    let config = EngineConfig { max_replay_ms: Some(3000), ..EngineConfig::default_test() };
    let engine = engine_with(storage, &clock, config, policy());
    let ticks = record_ticks(&engine);

    let report = engine.start().await.unwrap();

    assert_eq!(report.offline_ms, 5500);
    assert_eq!(report.replayed_ms, 3000);
    let ticks = ticks.lock().unwrap();
    assert_eq!(ticks.len(), 3);
    assert_eq!(ticks[0].1, epoch() - ms(4500));
}

#[tokio::test]
async fn replay_can_be_disabled() {
    let clock = manual_clock();
    let storage = Arc::new(MemoryStorage::with_save(0u64, epoch() - ms(5500)));
    let config = EngineConfig { replay_on_start: false, ..EngineConfig::default_test() };
    let engine = engine_with(storage, &clock, config, policy());
    let ticks = record_ticks(&engine);

    let report = engine.start().await.unwrap();

    assert_eq!(report.offline_ms, 5500);
    assert_eq!(report.replayed_ms, 0);
    assert!(ticks.lock().unwrap().is_empty());
}

// ── Warm running ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn dispatch_stamps_commands_with_the_engine_clock() {
    let clock = manual_clock();
    let engine = engine_with(
        Arc::new(MemoryStorage::<u64>::new()),
        &clock,
        EngineConfig::default_test(),
        policy(),
    );
    let counted = record(engine.events(), TestEventKind::Counted);
    let now = clock.advance_ms(1234);

    engine.dispatch(TestCommand::Increment).await;
    engine.dispatch(TestCommand::Increment).await;

    assert_eq!(*engine.state(), 2);
    let counted = counted.lock().unwrap();
    assert_eq!(counted.len(), 2);
    assert!(counted.iter().all(|event| event.timestamp == now));
}

#[tokio::test]
async fn replayed_ticks_drive_commands_with_historical_time() {
    let clock = manual_clock();
    let storage = Arc::new(MemoryStorage::with_save(0u64, epoch() - ms(3000)));
    // Long enough that only the shutdown flush can write.
    let config = EngineConfig { debounce_ms: 60_000, ..EngineConfig::default_test() };
    let engine = engine_with(
        storage.clone(),
        &clock,
        config,
        PersistencePolicy::new().debounced([TestEventKind::Counted]),
    );
    let counted = record(engine.events(), TestEventKind::Counted);

    let commands = engine.commands().clone();
    let _income = engine.ticks().subscribe(move |_delta_ms: DeltaMs, at: DateTime<Utc>| {
        let commands = commands.clone();
        async move {
            commands.dispatch(Envelope::new(TestCommand::Increment, at)).await;
            anyhow::Ok(())
        }
    });

    engine.start().await.unwrap();

    assert_eq!(*engine.state(), 3);
    let stamps: Vec<_> = counted.lock().unwrap().iter().map(|event| event.timestamp).collect();
    assert_eq!(stamps, vec![epoch() - ms(2000), epoch() - ms(1000), epoch()]);

    assert!(engine.persistence().has_pending_save());
    engine.shutdown().unwrap();
    assert_eq!(storage.save_count(), 1);
    assert_eq!(storage.saved_state(), Some(3));
}

#[tokio::test]
async fn command_failure_surfaces_as_an_event() {
    let clock = manual_clock();
    let engine = engine_with(
        Arc::new(MemoryStorage::<u64>::new()),
        &clock,
        EngineConfig::default_test(),
        policy(),
    );
    let failed = record(engine.events(), TestEventKind::CommandFailed);

    engine.dispatch(TestCommand::Unhandled).await;

    assert_eq!(
        failures(&failed),
        vec![(
            "Unhandled".to_string(),
            "No handler registered for command type: Unhandled".to_string()
        )]
    );
}

#[tokio::test]
async fn immediate_event_from_a_command_saves_the_committed_state() {
    let clock = manual_clock();
    let storage = Arc::new(MemoryStorage::<u64>::new());
    let engine = engine_with(storage.clone(), &clock, EngineConfig::default_test(), policy());
    engine
        .commands()
        .register(
            TestCommandKind::Add,
            |command: TestCommand, state: Arc<u64>, ctx: CommandContext| async move {
                let TestCommand::Add { amount } = command else {
                    anyhow::bail!("expected Add");
                };
                anyhow::Ok(CommandOutcome::new(
                    *state + amount,
                    vec![Envelope::new(TestEvent::Immediate, ctx.now)],
                ))
            },
        )
        .unwrap();

    engine.dispatch(TestCommand::Add { amount: 25 }).await;

    assert_eq!(storage.save_count(), 1);
    assert_eq!(storage.saved_state(), Some(25));
}

// ── Storage round trip ───────────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_save_survives_into_the_next_session() {
    let clock = manual_clock();
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    storage.migrate().unwrap();

    let first = engine_with(storage.clone(), &clock, EngineConfig::default_test(), policy());
    first.start().await.unwrap();
    first.dispatch(TestCommand::Increment).await;
    first.dispatch(TestCommand::Increment).await;
    first.shutdown().unwrap();
    drop(first);

    clock.advance_ms(2000);
    let second = engine_with(storage.clone(), &clock, EngineConfig::default_test(), policy());
    let ticks = record_ticks(&second);
    let report = second.start().await.unwrap();

    assert!(report.restored);
    assert_eq!(report.offline_ms, 2000);
    assert_eq!(*second.state(), 2);
    assert_eq!(ticks.lock().unwrap().len(), 2);
    assert_eq!(storage.save_count().unwrap(), 1);
}
