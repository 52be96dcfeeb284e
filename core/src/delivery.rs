//! Subscriber plumbing shared by the event bus, tick bus and command bus.
//!
//! RULE: One misbehaving subscriber never reaches its siblings or the
//! publisher. Errors, panics and timeouts all end here as a `DeliveryError`.

use futures_util::FutureExt;
use std::{
    any::Any,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum DeliveryError {
    #[error("{0}")]
    Failed(anyhow::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler timed out after {} ms", .0.as_millis())]
    TimedOut(Duration),
}

/// Drive one handler future to completion, catching errors and panics,
/// bounded by `deadline` when one is set.
pub(crate) async fn deliver<T, F>(handler: F, deadline: Option<Duration>) -> Result<T, DeliveryError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let guarded = AssertUnwindSafe(handler).catch_unwind();
    let outcome = match deadline {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(DeliveryError::TimedOut(limit)),
        },
        None => guarded.await,
    };
    match outcome {
        Ok(result) => result.map_err(DeliveryError::Failed),
        Err(panic) => Err(DeliveryError::Panicked(panic_message(&*panic))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Lock a registry mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by every `subscribe` call.
///
/// `unsubscribe()` removes exactly the handler it was issued for.
/// Dropping the handle leaves the subscription in place.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    async fn out_of_gold() -> anyhow::Result<()> {
        anyhow::bail!("out of gold")
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("boom")
    }

    async fn hang() -> anyhow::Result<()> {
        std::future::pending().await
    }

    #[tokio::test]
    async fn errors_keep_their_message() {
        let result = deliver(out_of_gold(), None).await;
        assert_eq!(result.unwrap_err().to_string(), "out of gold");
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let result = deliver(explode(), None).await;
        assert_eq!(result.unwrap_err().to_string(), "handler panicked: boom");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_turns_a_hang_into_a_timeout() {
        let result = deliver(hang(), Some(Duration::from_millis(250))).await;
        assert_eq!(result.unwrap_err().to_string(), "handler timed out after 250 ms");
    }

    #[test]
    fn unsubscribe_runs_cancel_once_and_drop_does_not() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sub.unsubscribe();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        drop(Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
