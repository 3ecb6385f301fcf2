//! Host callbacks fired by device traps.
//!
//! Each hook is a single slot. A trap that needs one and finds the slot
//! empty fails with `EIO`. Hooks return a future; the trap never waits on
//! it. If the future is already settled the outcome is applied before the
//! trap inspects the device again, otherwise it is finished on a runtime and
//! a failure is routed into the device's error slot.

use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::HostError;

/// A read or block-read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub name: String,
    pub position: u64,
    pub length: usize,
}

/// Bytes written by the engine to a writer device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub name: String,
    pub position: u64,
    pub data: Bytes,
}

pub type HookFuture = BoxFuture<'static, Result<(), HostError>>;
pub type ReadHook = Arc<dyn Fn(ReadRequest) -> HookFuture + Send + Sync>;
pub type WriteHook = Arc<dyn Fn(WriteRequest) -> HookFuture + Send + Sync>;

/// A hook future that is already settled successfully.
pub fn settled() -> HookFuture {
    futures::future::ready(Ok(())).boxed()
}

/// The three hook slots.
#[derive(Clone, Default)]
pub struct Hooks {
    pub read: Option<ReadHook>,
    pub block_read: Option<ReadHook>,
    pub write: Option<WriteHook>,
}

impl Hooks {
    pub fn on_read<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ReadRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        self.read = Some(Arc::new(move |req| hook(req).boxed()));
        self
    }

    pub fn on_block_read<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ReadRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        self.block_read = Some(Arc::new(move |req| hook(req).boxed()));
        self
    }

    pub fn on_write<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(WriteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HostError>> + Send + 'static,
    {
        self.write = Some(Arc::new(move |req| hook(req).boxed()));
        self
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("read", &self.read.is_some())
            .field("block_read", &self.block_read.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}

/// Runs hook futures and background device tasks.
#[derive(Debug, Clone)]
pub(crate) struct Driver {
    runtime: Option<tokio::runtime::Handle>,
}

impl Driver {
    /// Bind to the runtime the caller is running on, if any.
    pub(crate) fn capture() -> Self {
        Self {
            runtime: tokio::runtime::Handle::try_current().ok(),
        }
    }

    /// Spawn a background task: on the captured runtime, else on the current
    /// one, else on a dedicated thread.
    pub(crate) fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let runtime = self
            .runtime
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok());
        match runtime {
            Some(handle) => {
                handle.spawn(task);
            }
            None => {
                std::thread::spawn(move || futures::executor::block_on(task));
            }
        }
    }

    /// Poll `hook` once in place; finish it in the background if it is still
    /// pending. `on_error` receives a failure either way.
    pub(crate) fn drive(
        &self,
        mut hook: HookFuture,
        on_error: impl FnOnce(HostError) + Send + 'static,
    ) {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match hook.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(error)) => on_error(error),
            Poll::Pending => self.spawn(async move {
                if let Err(error) = hook.await {
                    on_error(error);
                }
            }),
        }
    }
}
