//! sim-runner: headless runner for the guild simulation.
//!
//! Usage:
//!   sim-runner --db guildhall.db --seconds 30
//!   sim-runner --seed 12345 --ipc-mode
//!
//! On start the saved guild is restored and the time since it was last
//! played is replayed as ticks, so missions finish and income accrues
//! while the game was closed.

mod guild;
mod names;
mod rng;
mod rules;
mod ticks;

use anyhow::Result;
use guild::{GuildConfig, GuildState};
use guildhall_core::{
    clock::{Clock, SystemClock},
    command::GameCommand,
    config::EngineConfig,
    engine::{ColdStart, SimEngine},
    event::{GameEvent, GameEventKind},
    message::{Envelope, Metadata},
    persistence::StorageAdapter,
    store::SqliteStorage,
};
use std::{
    env,
    io::{self, Write},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::io::{AsyncBufReadExt, BufReader};

type GuildEngine = SimEngine<GuildState, GameCommand, GameEvent>;

/// Failure reasons reported since the last drain, for IPC replies.
type FailureLog = Arc<Mutex<Vec<String>>>;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    Command { cmd: GameCommand },
    Quit,
}

#[derive(serde::Serialize)]
struct UiState<'a> {
    gold:               u64,
    income_per_sec:     u64,
    missions_completed: u64,
    adventurers:        Vec<&'a guild::Adventurer>,
    facilities:         &'a std::collections::BTreeMap<String, u32>,
    missions:           Vec<&'a guild::ActiveMission>,
    errors:             Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let seconds = parse_arg(&args, "--seconds", 5u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or("guildhall.db");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    if !ipc_mode {
        println!("Guildhall sim-runner");
        println!("  seed:      {seed}");
        println!("  seconds:   {seconds}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    let engine_config = EngineConfig::load(data_dir)?;
    let guild_config = Arc::new(GuildConfig::load(data_dir)?);

    let storage = Arc::new(SqliteStorage::open(db)?);
    storage.migrate()?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine: GuildEngine = SimEngine::new(
        GuildState::new(&guild_config, seed),
        storage.clone(),
        &GameEvent::persistence_policy(),
        clock,
        engine_config,
    )?;

    rules::register_rules(engine.commands(), Arc::clone(&guild_config))?;
    let failures = watch_failures(&engine);
    let _ticks = ticks::subscribe_all(engine.ticks(), engine.commands());

    let report = engine.start().await?;
    if !ipc_mode {
        print_cold_start(&report);
    }
    if !report.restored {
        recruit_starter_roster(&engine, &guild_config).await;
    }

    if ipc_mode {
        run_ipc_loop(&engine, &guild_config, &failures).await?;
    } else {
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }

    engine.shutdown()?;
    if !ipc_mode {
        print_summary(&engine, &guild_config, &storage)?;
    }
    Ok(())
}

/// Log every rejected command and keep its reason for the next IPC reply.
fn watch_failures(engine: &GuildEngine) -> FailureLog {
    let failures: FailureLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let _subscription = engine.events().subscribe(
        GameEventKind::CommandFailed,
        move |event: Envelope<GameEvent>| {
            let sink = Arc::clone(&sink);
            async move {
                if let GameEvent::CommandFailed { command_type, reason } = event.message {
                    log::warn!("{command_type} rejected: {reason}");
                    if let Ok(mut failures) = sink.lock() {
                        failures.push(format!("{command_type}: {reason}"));
                    }
                }
                anyhow::Ok(())
            }
        },
    );
    failures
}

async fn recruit_starter_roster(engine: &GuildEngine, config: &GuildConfig) {
    let state = engine.state();
    let mut rng = rng::GuildRng::new(state.seed, u64::MAX);
    for _ in 0..config.starter_roster {
        let name = names::adventurer_name(&mut rng);
        log::info!("Recruiting starter adventurer {name}");
        engine.dispatch(GameCommand::RecruitAdventurer { name }).await;
    }
}

async fn run_ipc_loop(engine: &GuildEngine, config: &GuildConfig, failures: &FailureLog) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let cmd: IpcCommand = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => {}
            IpcCommand::Command { cmd } => {
                let envelope = Envelope::new(cmd, engine.clock().now())
                    .with_metadata(Metadata::correlated().with_user("ipc"));
                engine.commands().dispatch(envelope).await;
            }
        }

        let errors = failures
            .lock()
            .map(|mut failures| std::mem::take(&mut *failures))
            .unwrap_or_default();
        let state = engine.state();
        writeln!(stdout, "{}", serde_json::to_string(&ui_state(&state, config, errors))?)?;
        stdout.flush()?;
    }
    Ok(())
}

fn ui_state<'a>(state: &'a GuildState, config: &GuildConfig, errors: Vec<String>) -> UiState<'a> {
    UiState {
        gold: state.gold,
        income_per_sec: state.income_per_sec(config),
        missions_completed: state.missions_completed,
        adventurers: state.adventurers.values().collect(),
        facilities: &state.facilities,
        missions: state.missions.values().collect(),
        errors,
    }
}

fn print_cold_start(report: &ColdStart) {
    if report.restored {
        println!("Restored save; offline for {:.1} s", report.offline_ms as f64 / 1000.0);
        if report.replayed_ms < report.offline_ms {
            println!("  replay capped at {:.1} s", report.replayed_ms as f64 / 1000.0);
        }
    } else {
        println!("No save found; founding a new guild");
    }
}

fn print_summary(engine: &GuildEngine, config: &GuildConfig, storage: &SqliteStorage) -> Result<()> {
    let state = engine.state();
    let last_played = StorageAdapter::<GuildState>::last_played(storage)?;

    println!();
    println!("=== GUILD SUMMARY ===");
    println!("  gold:               {}", state.gold);
    println!("  income:             {} / s", state.income_per_sec(config));
    println!("  adventurers:        {}", state.adventurers.len());
    println!("  idle:               {}", state.idle_adventurers().count());
    println!("  missions underway:  {}", state.missions.len());
    println!("  missions completed: {}", state.missions_completed);
    for (facility, level) in &state.facilities {
        println!("  {facility:<19} level {level}");
    }
    println!("  saves written:      {}", storage.save_count()?);
    if let Some(at) = last_played {
        println!("  last played:        {}", at.to_rfc3339());
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
