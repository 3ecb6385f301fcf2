//! Per-engine ordering of compound operations.
//!
//! The serializer keeps a single "current operation" slot. Enqueueing takes
//! the slot's previous occupant as the thing to wait for and installs the
//! new operation in its place, so operations start in submission order
//! without a queue. The slot is claimed when [`Serializer::enqueue`] is
//! called, not when the returned future is first polled.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;

/// Resolves once an operation and everything enqueued before it settled.
type Settled = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Slot {
    current: Option<(u64, Settled)>,
}

/// Orders compound operations on one engine instance.
#[derive(Default)]
pub struct Serializer {
    slot: Arc<Mutex<Slot>>,
    next_ticket: AtomicU64,
}

/// Held by an enqueued operation until it settles. A turn dropped before
/// its operation started still counts as unsettled until its predecessor
/// settles.
struct Turn {
    ticket: u64,
    slot: Arc<Mutex<Slot>>,
    done: Option<oneshot::Sender<()>>,
    started: bool,
}

impl Drop for Turn {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if !self.started {
            return;
        }
        let mut slot = self.slot.lock();
        if slot.current.as_ref().is_some_and(|(ticket, _)| *ticket == self.ticket) {
            slot.current = None;
        }
    }
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain `op` after the current operation.
    ///
    /// `op` does not start until every operation enqueued before it has
    /// settled, successfully or not. Dropping the returned future before
    /// `op` started does not let later operations overtake the ones before
    /// it.
    pub fn enqueue<F>(&self, op: F) -> impl Future<Output = F::Output> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = {
            let mut slot = self.slot.lock();
            let previous = slot.current.take().map(|(_, settled)| settled);
            let chained = previous.clone();
            let settled = async move {
                if let Some(previous) = chained {
                    previous.await;
                }
                // a cancelled operation counts as settled
                let _ = done_rx.await;
            }
            .boxed()
            .shared();
            slot.current = Some((ticket, settled));
            previous
        };
        let mut turn = Turn {
            ticket,
            slot: Arc::clone(&self.slot),
            done: Some(done_tx),
            started: previous.is_none(),
        };
        async move {
            if let Some(previous) = previous {
                previous.await;
            }
            turn.started = true;
            let output = op.await;
            drop(turn);
            output
        }
    }

    /// Whether an operation is enqueued, running, or cancelled while still
    /// waiting on one that is.
    pub fn is_busy(&self) -> bool {
        let current = self.slot.lock().current.clone();
        current.is_some_and(|(_, settled)| settled.now_or_never().is_none())
    }
}

impl std::fmt::Debug for Serializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializer")
            .field("busy", &self.is_busy())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn operations_run_in_submission_order() {
        let serializer = Serializer::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let log = Arc::clone(&log);
            serializer.enqueue(async move {
                log.lock().push("a start");
                tokio::time::sleep(Duration::from_millis(20)).await;
                log.lock().push("a end");
            })
        };
        let b = {
            let log = Arc::clone(&log);
            serializer.enqueue(async move {
                log.lock().push("b start");
            })
        };

        // poll b first; it still waits for a
        let b = tokio::spawn(b);
        tokio::task::yield_now().await;
        assert!(log.lock().is_empty());
        a.await;
        b.await.unwrap();
        assert_eq!(*log.lock(), vec!["a start", "a end", "b start"]);
        assert!(!serializer.is_busy());
    }

    #[tokio::test]
    async fn failures_release_the_turn() {
        let serializer = Serializer::new();
        let first = serializer.enqueue(async { Err::<(), _>("boom") });
        let second = serializer.enqueue(async { Ok::<_, &str>(2) });
        assert_eq!(first.await, Err("boom"));
        assert_eq!(second.await, Ok(2));
    }

    #[tokio::test]
    async fn dropped_operation_releases_the_turn() {
        let serializer = Serializer::new();
        let abandoned = serializer.enqueue(async { 1 });
        let next = serializer.enqueue(async { 2 });
        drop(abandoned);
        assert_eq!(next.await, 2);
        assert!(!serializer.is_busy());
    }

    #[tokio::test]
    async fn dropped_waiter_keeps_later_operations_queued() {
        let serializer = Serializer::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let a = {
            let log = Arc::clone(&log);
            tokio::spawn(serializer.enqueue(async move {
                log.lock().push("a start");
                let _ = release_rx.await;
                log.lock().push("a end");
            }))
        };
        tokio::task::yield_now().await;
        let b = serializer.enqueue(async {});
        drop(b);
        let c = {
            let log = Arc::clone(&log);
            tokio::spawn(serializer.enqueue(async move {
                log.lock().push("c start");
            }))
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*log.lock(), vec!["a start"]);
        assert!(serializer.is_busy());

        release_tx.send(()).expect("a should be waiting");
        a.await.expect("a should finish");
        c.await.expect("c should finish");
        assert_eq!(*log.lock(), vec!["a start", "a end", "c start"]);
        assert!(!serializer.is_busy());
    }

    #[tokio::test]
    async fn dropped_last_waiter_is_idle_once_its_predecessor_settles() {
        let serializer = Serializer::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let a = tokio::spawn(serializer.enqueue(async move {
            let _ = release_rx.await;
        }));
        tokio::task::yield_now().await;
        drop(serializer.enqueue(async {}));
        assert!(serializer.is_busy());

        release_tx.send(()).expect("a should be waiting");
        a.await.expect("a should finish");
        assert!(!serializer.is_busy());
    }

    #[tokio::test]
    async fn serializers_are_independent() {
        let one = Serializer::new();
        let two = Serializer::new();
        let (_hold_tx, hold_rx) = oneshot::channel::<()>();
        let _blocked = tokio::spawn(one.enqueue(async move {
            let _ = hold_rx.await;
        }));
        tokio::task::yield_now().await;
        assert_eq!(two.enqueue(async { 5 }).await, 5);
        assert!(one.is_busy());
    }
}
