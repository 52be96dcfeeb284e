//! The shared game-state cell.
//!
//! RULE: The command bus is the only writer during normal running.
//! State is replaced wholesale, never patched in place, so a reader
//! holding an old snapshot keeps seeing a consistent value.

use std::sync::{Arc, PoisonError, RwLock};

pub struct StateCell<S> {
    current: Arc<RwLock<Arc<S>>>,
}

impl<S> StateCell<S> {
    pub fn new(initial: S) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(initial))) }
    }

    /// The current snapshot.
    pub fn get(&self) -> Arc<S> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Replace the whole state.
    pub fn set(&self, next: S) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }
}

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self { current: Arc::clone(&self.current) }
    }
}
