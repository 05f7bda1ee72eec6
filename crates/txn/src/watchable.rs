//! One-shot completion cell
//!
//! A `Watchable<T>` resolves exactly once. Consumers either poll (`peek`),
//! block (`wait`), or attach callbacks (`on_resolve`) that run inline on
//! resolution. Transactions expose their persistence outcome through one,
//! and asynchronous mutation functions hand an unresolved cell back to the
//! committer and resolve it later.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

enum WatchState<T> {
    Pending(Vec<Box<dyn FnOnce(&T) + Send>>),
    Resolved(T),
}

struct WatchInner<T> {
    state: Mutex<WatchState<T>>,
    condvar: Condvar,
}

/// A value that becomes available exactly once
pub struct Watchable<T> {
    inner: Arc<WatchInner<T>>,
}

impl<T> Clone for Watchable<T> {
    fn clone(&self) -> Self {
        Watchable {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Watchable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Watchable<T> {
    /// Unresolved cell
    pub fn new() -> Self {
        Watchable {
            inner: Arc::new(WatchInner {
                state: Mutex::new(WatchState::Pending(Vec::new())),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Cell that is already resolved
    pub fn resolved(value: T) -> Self {
        Watchable {
            inner: Arc::new(WatchInner {
                state: Mutex::new(WatchState::Resolved(value)),
                condvar: Condvar::new(),
            }),
        }
    }

    /// True once a value is available
    pub fn is_resolved(&self) -> bool {
        matches!(*self.inner.state.lock(), WatchState::Resolved(_))
    }

    /// Resolve the cell, running pending callbacks inline. A second
    /// resolution is ignored; the first value wins.
    pub fn resolve(&self, value: T) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                WatchState::Resolved(_) => return,
                WatchState::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = WatchState::Resolved(value);
                    callbacks
                }
            }
        };
        self.inner.condvar.notify_all();
        if let WatchState::Resolved(value) = &*self.inner.state.lock() {
            for callback in callbacks {
                callback(value);
            }
        }
    }

    /// Attach a callback. Runs inline immediately when already resolved.
    pub fn on_resolve(&self, callback: impl FnOnce(&T) + Send + 'static) {
        let run_now = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                WatchState::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    None
                }
                WatchState::Resolved(_) => Some(callback),
            }
        };
        if let Some(callback) = run_now {
            if let WatchState::Resolved(value) = &*self.inner.state.lock() {
                callback(value);
            }
        }
    }
}

impl<T: Clone> Watchable<T> {
    /// The value, if resolved
    pub fn peek(&self) -> Option<T> {
        match &*self.inner.state.lock() {
            WatchState::Resolved(value) => Some(value.clone()),
            WatchState::Pending(_) => None,
        }
    }

    /// Block until resolved. Test and teardown use; the core never blocks
    /// on its own cells.
    pub fn wait(&self) -> T {
        let mut state = self.inner.state.lock();
        loop {
            if let WatchState::Resolved(value) = &*state {
                return value.clone();
            }
            self.inner.condvar.wait(&mut state);
        }
    }
}
