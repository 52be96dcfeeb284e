//! The domain event bus: fan-out of facts to their subscribers.
//!
//! RULES:
//!   - Every subscriber for an event's kind is started before any is awaited.
//!   - `publish` resolves only after every subscriber has settled.
//!   - A failing or panicking subscriber is logged and skipped; it never
//!     blocks its siblings and never reaches the publisher.
//!   - Publishing a kind nobody listens to is a no-op.

use crate::{
    delivery::{deliver, lock, Subscription},
    message::{DomainEvent, Envelope},
};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

/// A listener for one kind of domain event.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync {
    async fn handle(&self, event: Envelope<E>) -> anyhow::Result<()>;
}

#[async_trait]
impl<E, F, Fut> EventHandler<E> for F
where
    E: DomainEvent,
    F: Fn(Envelope<E>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: Envelope<E>) -> anyhow::Result<()> {
        (self)(event).await
    }
}

type SharedHandler<E> = Arc<dyn EventHandler<E>>;

struct Registry<E: DomainEvent> {
    next_id: u64,
    by_kind: HashMap<E::Kind, Vec<(u64, SharedHandler<E>)>>,
}

pub struct DomainEventBus<E: DomainEvent> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: DomainEvent> DomainEventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                by_kind: HashMap::new(),
            })),
        }
    }

    /// Register `handler` for one event kind.
    pub fn subscribe<H>(&self, kind: E::Kind, handler: H) -> Subscription
    where
        H: EventHandler<E> + 'static,
    {
        let id = {
            let mut registry = lock(&self.registry);
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .by_kind
                .entry(kind)
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };
        log::debug!("Event subscriber {id} added for {kind}");

        let registry = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            let Some(registry) = registry.upgrade() else { return };
            let mut registry = lock(&registry);
            if let Some(handlers) = registry.by_kind.get_mut(&kind) {
                handlers.retain(|(existing, _)| *existing != id);
                if handlers.is_empty() {
                    registry.by_kind.remove(&kind);
                }
            }
            log::debug!("Event subscriber {id} removed for {kind}");
        })
    }

    /// Deliver `event` to every current subscriber of its kind.
    pub async fn publish(&self, event: Envelope<E>) {
        let kind = event.kind();
        let handlers: Vec<SharedHandler<E>> = lock(&self.registry)
            .by_kind
            .get(&kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            log::trace!("No subscribers for {kind}");
            return;
        }

        let results = join_all(
            handlers
                .iter()
                .map(|handler| deliver(handler.handle(event.clone()), None)),
        )
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            log::warn!("Subscriber for {kind} failed: {err}");
        }
    }

    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        lock(&self.registry)
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl<E: DomainEvent> Default for DomainEventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DomainEvent> Clone for DomainEventBus<E> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}
