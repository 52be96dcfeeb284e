//! The persistence bus: decides when game state is written to storage.
//!
//! RULES:
//!   - Triggers are fixed at construction from a closed table of event kinds.
//!   - Immediate kinds save inside the event handler itself.
//!   - Debounced kinds share one timer; each such event restarts it, so a
//!     burst inside the window produces a single write.
//!   - `flush` cancels the pending timer and saves now (teardown hook).
//!   - No save happens while the resetting flag is set.
//!
//! Storage failures inside event handlers and timers are logged; the
//! direct calls (`load`, `last_played`, `flush`, `clear`) return them.

use crate::{
    clock::Clock,
    delivery::{lock, Subscription},
    error::SimResult,
    event_bus::DomainEventBus,
    message::{DomainEvent, Envelope},
    state::StateCell,
};
use chrono::{DateTime, Utc};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE_MS: u64 = 10_000;

/// Where the game state lives between sessions.
pub trait StorageAdapter<S>: Send + Sync {
    /// Persist `state`; `saved_at` becomes the stored last-played time.
    fn save(&self, state: &S, saved_at: DateTime<Utc>) -> SimResult<()>;
    fn load(&self) -> SimResult<Option<S>>;
    fn last_played(&self) -> SimResult<Option<DateTime<Utc>>>;
    fn clear(&self) -> SimResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Immediate,
    Debounced,
}

/// The closed table mapping event kinds to save behavior.
/// Kinds not listed never trigger a save.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistencePolicy<K> {
    pub immediate: Vec<K>,
    pub debounced: Vec<K>,
}

impl<K: Copy + PartialEq> PersistencePolicy<K> {
    pub fn new() -> Self {
        Self { immediate: Vec::new(), debounced: Vec::new() }
    }

    pub fn immediate(mut self, kinds: impl IntoIterator<Item = K>) -> Self {
        self.immediate.extend(kinds);
        self
    }

    pub fn debounced(mut self, kinds: impl IntoIterator<Item = K>) -> Self {
        self.debounced.extend(kinds);
        self
    }

    pub fn trigger_for(&self, kind: K) -> Option<SaveTrigger> {
        if self.immediate.contains(&kind) {
            Some(SaveTrigger::Immediate)
        } else if self.debounced.contains(&kind) {
            Some(SaveTrigger::Debounced)
        } else {
            None
        }
    }
}

impl<K: Copy + PartialEq> Default for PersistencePolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// The single shared debounce timer. `generation` lets a firing timer
/// tell whether it has since been superseded or cancelled.
struct Debounce {
    generation: u64,
    timer:      Option<JoinHandle<()>>,
}

struct Inner<S> {
    storage:   Arc<dyn StorageAdapter<S>>,
    state:     StateCell<S>,
    clock:     Arc<dyn Clock>,
    delay:     Duration,
    debounce:  Mutex<Debounce>,
    resetting: AtomicBool,
}

pub struct PersistenceBus<S> {
    inner:          Arc<Inner<S>>,
    _subscriptions: Arc<Vec<Subscription>>,
}

impl<S: Send + Sync + 'static> PersistenceBus<S> {
    pub fn new<E: DomainEvent>(
        storage: Arc<dyn StorageAdapter<S>>,
        state: StateCell<S>,
        events: &DomainEventBus<E>,
        policy: &PersistencePolicy<E::Kind>,
        clock: Arc<dyn Clock>,
        delay: Duration,
    ) -> Self {
        let inner = Arc::new(Inner {
            storage,
            state,
            clock,
            delay,
            debounce: Mutex::new(Debounce { generation: 0, timer: None }),
            resetting: AtomicBool::new(false),
        });

        let mut subscriptions = Vec::new();
        for &kind in &policy.immediate {
            let weak = Arc::downgrade(&inner);
            subscriptions.push(events.subscribe(kind, move |event: Envelope<E>| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        log::debug!("{} triggers an immediate save", event.kind());
                        inner.save();
                    }
                    anyhow::Ok(())
                }
            }));
        }
        for &kind in &policy.debounced {
            let weak = Arc::downgrade(&inner);
            subscriptions.push(events.subscribe(kind, move |event: Envelope<E>| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        log::trace!("{} restarts the save debounce", event.kind());
                        inner.schedule();
                    }
                    anyhow::Ok(())
                }
            }));
        }
        log::debug!(
            "Persistence wired: {} immediate, {} debounced event kind(s)",
            policy.immediate.len(),
            policy.debounced.len()
        );

        Self { inner, _subscriptions: Arc::new(subscriptions) }
    }

    pub fn load(&self) -> SimResult<Option<S>> {
        self.inner.storage.load()
    }

    pub fn last_played(&self) -> SimResult<Option<DateTime<Utc>>> {
        self.inner.storage.last_played()
    }

    /// Cancel any pending debounced save and save now.
    pub fn flush(&self) -> SimResult<()> {
        if self.inner.cancel_pending() {
            log::debug!("Flushing pending debounced save");
        }
        self.inner.try_save()
    }

    /// Wipe persisted state. A pending debounced save is cancelled first
    /// so it cannot write the old state back.
    pub fn clear(&self) -> SimResult<()> {
        self.inner.cancel_pending();
        self.inner.storage.clear()?;
        log::info!("Persisted game state cleared");
        Ok(())
    }

    /// While set, every save is skipped. Used around a state wipe.
    pub fn set_resetting(&self, resetting: bool) {
        self.inner.resetting.store(resetting, Ordering::SeqCst);
    }

    pub fn is_resetting(&self) -> bool {
        self.inner.resetting.load(Ordering::SeqCst)
    }

    pub fn has_pending_save(&self) -> bool {
        lock(&self.inner.debounce).timer.is_some()
    }
}

impl<S> Clone for PersistenceBus<S> {
    fn clone(&self) -> Self {
        Self {
            inner:          Arc::clone(&self.inner),
            _subscriptions: Arc::clone(&self._subscriptions),
        }
    }
}

impl<S: Send + Sync + 'static> Inner<S> {
    fn try_save(&self) -> SimResult<()> {
        if self.resetting.load(Ordering::SeqCst) {
            log::debug!("Save skipped while resetting");
            return Ok(());
        }
        let state = self.state.get();
        self.storage.save(&state, self.clock.now())?;
        log::debug!("Game state saved");
        Ok(())
    }

    fn save(&self) {
        if let Err(err) = self.try_save() {
            log::error!("Failed to save game state: {err}");
        }
    }

    fn schedule(self: &Arc<Self>) {
        let mut debounce = lock(&self.debounce);
        debounce.generation += 1;
        if let Some(timer) = debounce.timer.take() {
            timer.abort();
        }

        let generation = debounce.generation;
        let weak = Arc::downgrade(self);
        let delay = self.delay;
        debounce.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            {
                let mut debounce = lock(&inner.debounce);
                if debounce.generation != generation {
                    return;
                }
                debounce.timer = None;
            }
            inner.save();
        }));
    }

    /// Returns true if a timer was pending.
    fn cancel_pending(&self) -> bool {
        let mut debounce = lock(&self.debounce);
        debounce.generation += 1;
        match debounce.timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}
