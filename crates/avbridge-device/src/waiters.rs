//! Per-device waiter registry.
//!
//! A waiter is a one-shot continuation registered under a device name.
//! Waking a name takes its whole list out of the registry before resuming
//! anything, so a waiter registered by a resumed continuation (or by anyone
//! else after the wake) waits for the next wake.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use parking_lot::Mutex;

/// The device went away before it became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wait cancelled")]
pub struct Cancelled;

/// How a waiter was resumed.
pub type WakeOutcome = Result<(), Cancelled>;

type Resume = Box<dyn FnOnce(WakeOutcome) + Send>;

#[derive(Default)]
pub struct WaiterRegistry {
    waiters: Mutex<HashMap<String, Vec<Resume>>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `resume` behind the waiters already registered for `name`.
    pub fn register(&self, name: &str, resume: impl FnOnce(WakeOutcome) + Send + 'static) {
        self.waiters
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Box::new(resume));
    }

    /// Register a waiter and return a handle that resolves when it is resumed.
    pub fn wait(&self, name: &str) -> WaitHandle {
        let (tx, rx) = oneshot::channel();
        self.register(name, move |outcome| {
            let _ = tx.send(outcome);
        });
        WaitHandle { rx: Some(rx) }
    }

    /// Resume every waiter on `name` in registration order. Returns how many
    /// were resumed.
    pub fn wake(&self, name: &str) -> usize {
        self.resume_all(name, Ok(()))
    }

    /// Resume every waiter on `name` with [`Cancelled`].
    pub fn cancel(&self, name: &str) -> usize {
        self.resume_all(name, Err(Cancelled))
    }

    /// Cancel the waiters of every name.
    pub fn cancel_all(&self) -> usize {
        let all = std::mem::take(&mut *self.waiters.lock());
        let mut count = 0;
        for (_, list) in all {
            count += list.len();
            list.into_iter().for_each(|resume| resume(Err(Cancelled)));
        }
        count
    }

    /// Number of waiters registered for `name`.
    pub fn pending(&self, name: &str) -> usize {
        self.waiters.lock().get(name).map_or(0, Vec::len)
    }

    /// `true` if any name has waiters.
    pub fn any_pending(&self) -> bool {
        self.waiters.lock().values().any(|list| !list.is_empty())
    }

    fn resume_all(&self, name: &str, outcome: WakeOutcome) -> usize {
        let list = self.waiters.lock().remove(name).unwrap_or_default();
        let count = list.len();
        for resume in list {
            resume(outcome);
        }
        if count > 0 {
            tracing::trace!(device = name, count, ?outcome, "waiters resumed");
        }
        count
    }
}

impl std::fmt::Debug for WaiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let waiters = self.waiters.lock();
        let counts: HashMap<&str, usize> =
            waiters.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("WaiterRegistry").field("waiters", &counts).finish()
    }
}

/// Resolves when its waiter is resumed.
///
/// Dropping the registry entry without resuming it (for example when the
/// registry itself is dropped) resolves the handle with [`Cancelled`].
#[derive(Debug)]
pub struct WaitHandle {
    rx: Option<oneshot::Receiver<WakeOutcome>>,
}

impl WaitHandle {
    /// A handle that is already resumed.
    pub fn ready() -> Self {
        Self { rx: None }
    }

    /// Block the current thread until the waiter is resumed.
    pub fn blocking_wait(self) -> WakeOutcome {
        futures::executor::block_on(self)
    }
}

impl Future for WaitHandle {
    type Output = WakeOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn wake_resumes_in_registration_order() {
        let registry = WaiterRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["w1", "w2"] {
            let order = Arc::clone(&order);
            registry.register("x", move |outcome| order.lock().push((tag, outcome)));
        }
        assert_eq!(registry.wake("x"), 2);
        assert_eq!(*order.lock(), vec![("w1", Ok(())), ("w2", Ok(()))]);
        assert_eq!(registry.pending("x"), 0);
    }

    #[test]
    fn waiter_registered_after_wake_is_not_resumed() {
        let registry = WaiterRegistry::new();
        let first = registry.wait("x");
        registry.wake("x");
        let second = registry.wait("x");
        assert_eq!(first.blocking_wait(), Ok(()));
        assert_eq!(registry.pending("x"), 1);
        registry.wake("x");
        assert_eq!(second.blocking_wait(), Ok(()));
    }

    #[test]
    fn waiter_registered_during_wake_waits_for_the_next_one() {
        let registry = Arc::new(WaiterRegistry::new());
        let again = Arc::clone(&registry);
        let resumed = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&resumed);
        registry.register("x", move |_| {
            *counter.lock() += 1;
            let counter = Arc::clone(&counter);
            again.register("x", move |_| *counter.lock() += 10);
        });
        assert_eq!(registry.wake("x"), 1);
        assert_eq!(*resumed.lock(), 1);
        assert_eq!(registry.pending("x"), 1);
    }

    #[test]
    fn wake_without_waiters_is_a_no_op() {
        let registry = WaiterRegistry::new();
        let other = registry.wait("y");
        assert_eq!(registry.wake("x"), 0);
        assert_eq!(registry.pending("y"), 1);
        registry.cancel("y");
        assert_eq!(other.blocking_wait(), Err(Cancelled));
    }

    #[test]
    fn cancel_all_reaches_every_name() {
        let registry = WaiterRegistry::new();
        let a = registry.wait("a");
        let b = registry.wait("b");
        assert!(registry.any_pending());
        assert_eq!(registry.cancel_all(), 2);
        assert!(!registry.any_pending());
        assert_eq!(a.blocking_wait(), Err(Cancelled));
        assert_eq!(b.blocking_wait(), Err(Cancelled));
    }

    #[test]
    fn dropped_registry_cancels_handles() {
        let registry = WaiterRegistry::new();
        let handle = registry.wait("gone");
        drop(registry);
        assert_eq!(handle.blocking_wait(), Err(Cancelled));
    }
}
