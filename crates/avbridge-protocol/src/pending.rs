//! Outstanding call table.
//!
//! Ids start at 1 and only grow, so an id is never reused while its call is
//! outstanding. A reply for an unknown id is dropped. Terminating the table
//! refuses new calls but keeps the outstanding ones: they never resolve.

use std::collections::HashMap;

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::error::{ProtocolError, Result};

struct Inner<T> {
    next_id: u64,
    entries: HashMap<u64, oneshot::Sender<T>>,
    terminated: bool,
}

pub struct PendingTable<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                entries: HashMap::new(),
                terminated: false,
            }),
        }
    }
}

impl<T> PendingTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id and the receiver its reply resolves.
    pub fn register(&self) -> Result<(u64, oneshot::Receiver<T>)> {
        let mut inner = self.inner.lock();
        if inner.terminated {
            return Err(ProtocolError::Terminated);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.entries.insert(id, tx);
        Ok((id, rx))
    }

    /// Resolve `id`. Returns `false` when no such call is outstanding or the
    /// table is terminated.
    pub fn resolve(&self, id: u64, value: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.terminated {
            tracing::trace!(id, "reply after termination discarded");
            return false;
        }
        let Some(tx) = inner.entries.remove(&id) else {
            tracing::trace!(id, "reply for unknown call discarded");
            return false;
        };
        drop(inner);
        // a dropped receiver means the caller stopped waiting
        let _ = tx.send(value);
        true
    }

    /// Forget `id` without resolving it.
    pub fn cancel(&self, id: u64) -> bool {
        self.inner.lock().entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further registrations. Outstanding entries are kept.
    pub fn terminate(&self) {
        self.inner.lock().terminated = true;
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }
}

impl<T> std::fmt::Debug for PendingTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PendingTable")
            .field("next_id", &inner.next_id)
            .field("outstanding", &inner.entries.len())
            .field("terminated", &inner.terminated)
            .finish()
    }
}
