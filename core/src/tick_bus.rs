//! The tick bus: the simulation heartbeat.
//!
//! Two ways ticks are produced, one handler contract for both:
//!
//!   LIVE    A periodic timer runs while at least one handler is subscribed.
//!           The first subscribe starts it, the last unsubscribe stops it.
//!           Each firing carries the measured wall-clock gap since the
//!           previous firing, and all handlers run concurrently.
//!
//!   REPLAY  `replay_ticks` rebuilds elapsed offline time as evenly spaced
//!           synthetic ticks with historical timestamps. Ticks run strictly
//!           one after another; every handler settles before the next tick.
//!
//! Handlers cannot tell the two apart, and must not assume live-tick
//! concurrency during replay or vice versa.
//!
//! A replay holds the emission gate for its whole run, so a live tick never
//! lands between two replayed ticks. Live firings that queued behind a replay
//! are dropped and the timer restarts its period from the end of the replay.

use crate::{
    clock::Clock,
    delivery::{deliver, lock, Subscription},
    types::DeltaMs,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use std::{
    future::Future,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    sync::Mutex as AsyncMutex,
    time::{self, Instant, MissedTickBehavior},
};

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self, delta_ms: DeltaMs, at: DateTime<Utc>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> TickHandler for F
where
    F: Fn(DeltaMs, DateTime<Utc>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_tick(&self, delta_ms: DeltaMs, at: DateTime<Utc>) -> anyhow::Result<()> {
        (self)(delta_ms, at).await
    }
}

struct Registry {
    next_id:  u64,
    handlers: Vec<(u64, Arc<dyn TickHandler>)>,
    timer:    Option<JoinHandle<()>>,
}

struct Inner {
    registry:        Mutex<Registry>,
    /// Held for one live tick or for one whole replay.
    gate:            AsyncMutex<()>,
    clock:           Arc<dyn Clock>,
    interval:        Duration,
    handler_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct TickBus {
    inner: Arc<Inner>,
}

impl TickBus {
    pub fn new(clock: Arc<dyn Clock>, interval: Duration, handler_timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    next_id:  0,
                    handlers: Vec::new(),
                    timer:    None,
                }),
                gate: AsyncMutex::new(()),
                clock,
                interval,
                handler_timeout,
            }),
        }
    }

    /// Add a handler. Starts the live timer if this is the first one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<H: TickHandler + 'static>(&self, handler: H) -> Subscription {
        let id = {
            let mut registry = lock(&self.inner.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.handlers.push((id, Arc::new(handler)));
            if registry.timer.is_none() {
                let timer = run_timer(Arc::downgrade(&self.inner), self.inner.interval);
                registry.timer = Some(tokio::spawn(timer));
                log::debug!("Tick timer started ({:?} interval)", self.inner.interval);
            }
            id
        };

        let inner = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove(id);
            }
        })
    }

    /// Whether the live timer is currently running.
    pub fn is_ticking(&self) -> bool {
        lock(&self.inner.registry).timer.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.registry).handlers.len()
    }

    /// Replay `elapsed_ms` of missed time as discrete ticks.
    ///
    /// Emits `elapsed_ms / tick_interval_ms` full ticks stamped
    /// `start + (i + 1) * tick_interval_ms`, then one remainder tick if the
    /// division is not exact. `start` defaults to `now - elapsed_ms`.
    /// Live ticks are held off until the replay returns.
    /// Returns the number of ticks emitted.
    pub async fn replay_ticks(
        &self,
        elapsed_ms: u64,
        tick_interval_ms: u64,
        start: Option<DateTime<Utc>>,
    ) -> u64 {
        if tick_interval_ms == 0 {
            log::warn!("Ignoring replay of {elapsed_ms} ms with a zero tick interval");
            return 0;
        }
        let _gate = self.inner.gate.lock().await;
        let start = start.unwrap_or_else(|| self.inner.clock.now() - millis(elapsed_ms));
        let full_ticks = elapsed_ms / tick_interval_ms;
        let remainder = elapsed_ms % tick_interval_ms;
        log::info!(
            "Replaying {elapsed_ms} ms from {start}: {full_ticks} tick(s) of {tick_interval_ms} ms, remainder {remainder} ms"
        );

        for i in 0..full_ticks {
            let at = start + millis((i + 1) * tick_interval_ms);
            self.inner.emit(tick_interval_ms, at).await;
        }
        if remainder > 0 {
            let at = start + millis(full_ticks * tick_interval_ms + remainder);
            self.inner.emit(remainder, at).await;
        }
        full_ticks + u64::from(remainder > 0)
    }
}

impl Inner {
    fn remove(&self, id: u64) {
        let mut registry = lock(&self.registry);
        registry.handlers.retain(|(existing, _)| *existing != id);
        if registry.handlers.is_empty() {
            if let Some(timer) = registry.timer.take() {
                timer.abort();
                log::debug!("Tick timer stopped");
            }
        }
    }

    /// Run every handler once for one tick and wait for all of them.
    async fn emit(&self, delta_ms: DeltaMs, at: DateTime<Utc>) {
        let handlers: Vec<Arc<dyn TickHandler>> = lock(&self.registry)
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let results = join_all(
            handlers
                .iter()
                .map(|handler| deliver(handler.on_tick(delta_ms, at), self.handler_timeout)),
        )
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            log::warn!("Tick handler failed at {at}: {err}");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.registry).timer.take() {
            timer.abort();
        }
    }
}

async fn run_timer(inner: Weak<Inner>, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        let _gate = match inner.gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                // A replay held the gate; this firing is stale.
                let _gate = inner.gate.lock().await;
                log::debug!("Live tick dropped after replay; timer period restarted");
                interval.reset();
                last = Instant::now();
                continue;
            }
        };

        let now = Instant::now();
        let delta_ms = now.duration_since(last).as_millis() as DeltaMs;
        last = now;

        let at = inner.clock.now();
        inner.emit(delta_ms, at).await;
    }
}

fn millis(ms: u64) -> ChronoDuration {
    ChronoDuration::milliseconds(ms as i64)
}
