//! The command bus: turns intents into state transitions, one at a time.
//!
//! EXECUTION ORDER (per command, never interleaved with another command):
//!   1. Look up the handler registered for the command's kind.
//!   2. Run it against the current state snapshot.
//!   3. Commit the returned state.
//!   4. Publish the returned events in order, each fully delivered
//!      before the next starts.
//!
//! RULES:
//!   - `dispatch` enqueues immediately and never fails. Every failure
//!     (no handler, error, panic, timeout) becomes exactly one
//!     `CommandFailed` event and leaves state untouched.
//!   - Commands drain in FIFO order. Callers may dispatch back-to-back
//!     without awaiting; no two handlers ever run concurrently.
//!   - A command handler must not await its own bus's dispatch. It would
//!     wait on the queue it is blocking.

use crate::{
    clock::Clock,
    delivery::{deliver, lock, DeliveryError},
    error::{SimError, SimResult},
    event_bus::DomainEventBus,
    message::{DomainEvent, Envelope, Message, Metadata},
    state::StateCell,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::oneshot;

/// What a handler hands back: the full replacement state and the facts it produced.
#[derive(Debug, Clone)]
pub struct CommandOutcome<S, E> {
    pub new_state: S,
    pub events:    Vec<Envelope<E>>,
}

impl<S, E> CommandOutcome<S, E> {
    pub fn new(new_state: S, events: Vec<Envelope<E>>) -> Self {
        Self { new_state, events }
    }
}

/// Per-command context passed to handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandContext {
    /// The command's own timestamp. During offline replay this is the
    /// synthetic tick time, not the wall clock.
    pub now:            DateTime<Utc>,
    pub correlation_id: Option<String>,
}

/// Business logic for one command kind.
#[async_trait]
pub trait CommandHandler<S, C, E>: Send + Sync
where
    S: Send + Sync + 'static,
    C: Message,
    E: DomainEvent,
{
    async fn handle(
        &self,
        command: C,
        state: Arc<S>,
        ctx: CommandContext,
    ) -> anyhow::Result<CommandOutcome<S, E>>;
}

#[async_trait]
impl<S, C, E, F, Fut> CommandHandler<S, C, E> for F
where
    S: Send + Sync + 'static,
    C: Message,
    E: DomainEvent,
    F: Fn(C, Arc<S>, CommandContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<CommandOutcome<S, E>>> + Send + 'static,
{
    async fn handle(
        &self,
        command: C,
        state: Arc<S>,
        ctx: CommandContext,
    ) -> anyhow::Result<CommandOutcome<S, E>> {
        (self)(command, state, ctx).await
    }
}

type SharedHandler<S, C, E> = Arc<dyn CommandHandler<S, C, E>>;

/// A dispatched command waiting its turn. Never leaves the bus.
struct QueuedCommand<C> {
    envelope: Envelope<C>,
    done:     oneshot::Sender<()>,
}

struct Queue<C> {
    pending:  VecDeque<QueuedCommand<C>>,
    draining: bool,
}

struct Inner<S, C: Message, E: DomainEvent> {
    handlers:        Mutex<HashMap<C::Kind, SharedHandler<S, C, E>>>,
    queue:           Mutex<Queue<C>>,
    state:           StateCell<S>,
    events:          DomainEventBus<E>,
    clock:           Arc<dyn Clock>,
    handler_timeout: Option<Duration>,
}

pub struct CommandBus<S, C: Message, E: DomainEvent> {
    inner: Arc<Inner<S, C, E>>,
}

impl<S, C, E> CommandBus<S, C, E>
where
    S: Send + Sync + 'static,
    C: Message,
    E: DomainEvent,
{
    pub fn new(
        state: StateCell<S>,
        events: DomainEventBus<E>,
        clock: Arc<dyn Clock>,
        handler_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: Mutex::new(HashMap::new()),
                queue: Mutex::new(Queue {
                    pending:  VecDeque::new(),
                    draining: false,
                }),
                state,
                events,
                clock,
                handler_timeout,
            }),
        }
    }

    /// Bind `handler` to `kind`. A kind holds at most one handler; a second
    /// registration is rejected until the first is unregistered.
    pub fn register<H>(&self, kind: C::Kind, handler: H) -> SimResult<()>
    where
        H: CommandHandler<S, C, E> + 'static,
    {
        let mut handlers = lock(&self.inner.handlers);
        if handlers.contains_key(&kind) {
            return Err(SimError::HandlerAlreadyRegistered {
                command_type: kind.to_string(),
            });
        }
        handlers.insert(kind, Arc::new(handler));
        log::debug!("Command handler registered for {kind}");
        Ok(())
    }

    /// Hot-swap the handler for `kind`. Returns true if one was replaced.
    pub fn replace<H>(&self, kind: C::Kind, handler: H) -> bool
    where
        H: CommandHandler<S, C, E> + 'static,
    {
        let replaced = lock(&self.inner.handlers)
            .insert(kind, Arc::new(handler))
            .is_some();
        log::debug!("Command handler for {kind} replaced: {replaced}");
        replaced
    }

    /// Returns true if a handler was removed.
    pub fn unregister(&self, kind: C::Kind) -> bool {
        lock(&self.inner.handlers).remove(&kind).is_some()
    }

    pub fn has_handler(&self, kind: C::Kind) -> bool {
        lock(&self.inner.handlers).contains_key(&kind)
    }

    /// Enqueue a command. The returned receipt resolves once the command's
    /// full effect (state commit and event delivery) has completed.
    /// Dropping the receipt does not cancel the command.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, command: Envelope<C>) -> DispatchReceipt {
        let (done, finished) = oneshot::channel();
        let start_drain = {
            let mut queue = lock(&self.inner.queue);
            queue.pending.push_back(QueuedCommand { envelope: command, done });
            !std::mem::replace(&mut queue.draining, true)
        };
        if start_drain {
            tokio::spawn(Arc::clone(&self.inner).drain());
        }
        DispatchReceipt { finished }
    }

    /// Number of commands waiting behind the one currently executing.
    pub fn queued(&self) -> usize {
        lock(&self.inner.queue).pending.len()
    }
}

impl<S, C: Message, E: DomainEvent> Clone for CommandBus<S, C, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<S, C, E> Inner<S, C, E>
where
    S: Send + Sync + 'static,
    C: Message,
    E: DomainEvent,
{
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut queue = lock(&self.queue);
                match queue.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        queue.draining = false;
                        break;
                    }
                }
            };
            self.execute(next.envelope).await;
            // The caller may have dropped its receipt.
            let _ = next.done.send(());
        }
    }

    async fn execute(&self, envelope: Envelope<C>) {
        let kind = envelope.kind();
        let correlation_id = envelope.correlation_id().map(str::to_owned);
        let handler = lock(&self.handlers).get(&kind).cloned();

        let Some(handler) = handler else {
            let reason = format!("No handler registered for command type: {kind}");
            self.fail(kind, reason, correlation_id).await;
            return;
        };

        let ctx = CommandContext {
            now:            envelope.timestamp,
            correlation_id: correlation_id.clone(),
        };
        let state = self.state.get();

        match deliver(handler.handle(envelope.message, state, ctx), self.handler_timeout).await {
            Ok(outcome) => {
                self.state.set(outcome.new_state);
                log::debug!(
                    "Command {kind} committed, publishing {} event(s)",
                    outcome.events.len()
                );
                for event in outcome.events {
                    self.events.publish(event).await;
                }
            }
            Err(DeliveryError::TimedOut(limit)) => {
                let reason = format!("Command handler timed out after {} ms", limit.as_millis());
                self.fail(kind, reason, correlation_id).await;
            }
            Err(err) => self.fail(kind, err.to_string(), correlation_id).await,
        }
    }

    async fn fail(&self, kind: C::Kind, reason: String, correlation_id: Option<String>) {
        log::warn!("Command {kind} failed: {reason}");
        let mut failed = Envelope::new(E::command_failed(kind.to_string(), reason), self.clock.now());
        if let Some(id) = correlation_id {
            failed = failed.with_metadata(Metadata::for_correlation(id));
        }
        self.events.publish(failed).await;
    }
}

/// Resolves when a dispatched command has fully executed.
#[derive(Debug)]
pub struct DispatchReceipt {
    finished: oneshot::Receiver<()>,
}

impl Future for DispatchReceipt {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A closed channel means the runtime shut down mid-drain; either way
        // there is nothing left to wait for.
        Pin::new(&mut self.finished).poll(cx).map(|_| ())
    }
}
