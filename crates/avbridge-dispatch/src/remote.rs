//! Calls across a message link.
//!
//! The engine side ([`spawn_engine`]) owns the engine on a dedicated thread
//! and answers calls in arrival order; replies for pending outcomes are
//! sent when they settle. The host side ([`RemoteClient`]) correlates
//! replies by id and turns engine events into host hook invocations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use avbridge_device::{DeviceConfig, DeviceTable, HookFuture, Hooks, HostError, ReadRequest, WriteRequest};
use avbridge_engine::codes::EIO;
use avbridge_engine::{EngineError, EngineFactory, EngineOptions};
use avbridge_marshal::Value;
use avbridge_protocol::{
    CallEnvelope, ErrorPayload, EventEnvelope, EventKind, Link, LinkReceiver, LinkSender, Message,
    PendingTable, ProtocolError, ReplyEnvelope,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};

use crate::context::{invoke, EngineContext, Outcome};
use crate::error::{BridgeError, Result};
use crate::function::{Builtin, Function};

/// Host errors raised on the engine thread, handed to the host side
/// unchanged when both live in one process.
pub(crate) type HostErrorRelay = Arc<Mutex<Option<HostError>>>;

/// Where the engine's device table lives.
pub(crate) enum EngineDevices {
    /// A table of its own on the engine thread; hooks become events.
    Own(DeviceConfig),
    /// A table shared with the host, which services hooks directly.
    Shared(Arc<DeviceTable>, HostErrorRelay),
}

/// Start the engine context on a thread of its own.
pub(crate) fn spawn_engine(
    factory: Arc<dyn EngineFactory>,
    options: EngineOptions,
    devices: EngineDevices,
    link: Link,
) -> Result<()> {
    std::thread::Builder::new()
        .name("avbridge-engine".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    let _ = link.sender.send(Message::Event(EventEnvelope::load_failed(
                        ErrorPayload::new("load", err.to_string()),
                    )));
                    return;
                }
            };
            runtime.block_on(serve(factory, options, devices, link));
        })?;
    Ok(())
}

async fn serve(
    factory: Arc<dyn EngineFactory>,
    options: EngineOptions,
    devices: EngineDevices,
    link: Link,
) {
    let (sender, mut receiver) = link.split();
    let (table, relay) = match devices {
        EngineDevices::Own(config) => {
            let table = DeviceTable::new(config);
            table.set_hooks(event_hooks(sender.clone()));
            (table, None)
        }
        EngineDevices::Shared(table, relay) => (table, Some(relay)),
    };

    let engine = match factory.create(&options, table.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            let reason = match err {
                EngineError::Load { reason, .. } => reason,
                other => other.to_string(),
            };
            tracing::debug!(engine = factory.name(), %reason, "engine load failed");
            let _ = sender.send(Message::Event(EventEnvelope::load_failed(ErrorPayload::new(
                "load", reason,
            ))));
            return;
        }
    };
    let mut ctx = EngineContext::new(engine, Arc::clone(&table));
    if sender.send(Message::Event(EventEnvelope::ready())).is_err() {
        return;
    }
    tracing::debug!(engine = factory.name(), threads = options.threads, "engine context ready");

    while let Some(message) = receiver.recv().await {
        match message {
            Message::Call(call) => handle_call(&mut ctx, call, &sender, relay.as_ref()),
            Message::Shutdown => break,
            other => tracing::warn!(id = ?other.id(), "unexpected message on engine link"),
        }
    }
    table.cancel_all();
    tracing::debug!("engine context stopped");
}

fn handle_call(
    ctx: &mut EngineContext,
    call: CallEnvelope,
    sender: &LinkSender,
    relay: Option<&HostErrorRelay>,
) {
    let CallEnvelope { id, function, args } = call;
    tracing::trace!(id, function = %function, "engine call");
    let outcome = function
        .parse::<Function>()
        .and_then(|parsed| invoke(ctx, parsed, args));
    match outcome {
        Ok(Outcome::Ready(value)) => reply(sender, id, function, Ok(value), relay),
        Ok(Outcome::Pending(pending)) => {
            let sender = sender.clone();
            let relay = relay.cloned();
            tokio::spawn(async move {
                let result = pending.await;
                reply(&sender, id, function, result, relay.as_ref());
            });
        }
        Err(error) => reply(sender, id, function, Err(error), relay),
    }
}

fn reply(
    sender: &LinkSender,
    id: u64,
    function: String,
    result: Result<Value>,
    relay: Option<&HostErrorRelay>,
) {
    let outcome = result.map_err(|error| {
        if let (BridgeError::Host(host), Some(relay)) = (&error, relay) {
            *relay.lock() = Some(host.clone());
        }
        error.to_payload()
    });
    let reply = ReplyEnvelope {
        id,
        function,
        outcome,
    };
    if let Err(err) = sender.send(Message::Reply(reply)) {
        tracing::warn!(id, %err, "reply not delivered");
    }
}

/// Engine-side hooks that forward every request to the host as an event.
fn event_hooks(sender: LinkSender) -> Hooks {
    let read = sender.clone();
    let block_read = sender.clone();
    let write = sender;
    let emit = |sender: &LinkSender, event: EventEnvelope| -> HookFuture {
        let sent = sender
            .send(Message::Event(event))
            .map_err(|err| HostError::msg(err.to_string()));
        futures::future::ready(sent).boxed()
    };
    Hooks {
        read: Some(Arc::new(move |req: ReadRequest| {
            emit(&read, EventEnvelope::read(&req.name, req.position, req.length))
        })),
        block_read: Some(Arc::new(move |req: ReadRequest| {
            emit(&block_read, EventEnvelope::block_read(&req.name, req.position, req.length))
        })),
        write: Some(Arc::new(move |req: WriteRequest| {
            emit(&write, EventEnvelope::write(&req.name, req.position, req.data))
        })),
    }
}

/// Host side of a link to an engine context.
pub(crate) struct RemoteClient {
    sender: LinkSender,
    pending: Arc<PendingTable<Result<Value>>>,
    hooks: Arc<RwLock<Hooks>>,
    terminated: AtomicBool,
}

impl RemoteClient {
    /// Wait for the engine context to report its load outcome, then start
    /// routing its messages.
    pub(crate) async fn connect(
        link: Link,
        factory: &str,
        relay: Option<HostErrorRelay>,
    ) -> Result<Self> {
        let (sender, mut receiver) = link.split();
        loop {
            match receiver.recv().await {
                Some(Message::Event(EventEnvelope {
                    kind: EventKind::Ready,
                    ..
                })) => break,
                Some(Message::Event(EventEnvelope {
                    kind: EventKind::Error,
                    outcome,
                })) => {
                    let reason = match outcome {
                        Err(payload) => payload.message,
                        Ok(value) => format!("{value:?}"),
                    };
                    return Err(EngineError::Load {
                        factory: factory.to_string(),
                        reason,
                    }
                    .into());
                }
                Some(other) => tracing::warn!(id = ?other.id(), "message before engine ready discarded"),
                None => {
                    return Err(EngineError::Load {
                        factory: factory.to_string(),
                        reason: "engine context exited before it was ready".into(),
                    }
                    .into())
                }
            }
        }

        let client = Self {
            sender,
            pending: Arc::new(PendingTable::new()),
            hooks: Arc::new(RwLock::new(Hooks::default())),
            terminated: AtomicBool::new(false),
        };
        let router = Router {
            sender: client.sender.clone(),
            pending: Arc::clone(&client.pending),
            hooks: Arc::clone(&client.hooks),
            relay,
        };
        tokio::spawn(router.run(receiver));
        Ok(client)
    }

    /// Send `function` when the returned future is first polled and resolve
    /// with its reply.
    pub(crate) fn call(&self, function: Function, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        let sender = self.sender.clone();
        let pending = Arc::clone(&self.pending);
        async move {
            let (id, reply) = pending.register().map_err(|_| BridgeError::Terminated)?;
            let outstanding = Outstanding { pending, id };
            let call = CallEnvelope {
                id,
                function: function.name().into_owned(),
                args,
            };
            if let Err(err) = sender.send(Message::Call(call)) {
                return Err(match err {
                    ProtocolError::Closed => BridgeError::Terminated,
                    other => other.into(),
                });
            }
            // the table outlives every call while the handle is alive
            let result = reply.await.unwrap_or(Err(BridgeError::Terminated));
            drop(outstanding);
            result
        }
        .boxed()
    }

    pub(crate) fn set_hooks(&self, hooks: Hooks) {
        *self.hooks.write() = hooks;
    }

    pub(crate) fn update_hooks(&self, update: impl FnOnce(&mut Hooks)) {
        update(&mut self.hooks.write());
    }

    /// Calls sent to the engine context and not yet answered.
    pub(crate) fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Refuse new calls and stop the engine context. Outstanding calls are
    /// left unresolved.
    pub(crate) fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pending.terminate();
        let _ = self.sender.send(Message::Shutdown);
        tracing::debug!(outstanding = self.pending.len(), "engine link terminated");
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Host-side message loop.
struct Router {
    sender: LinkSender,
    pending: Arc<PendingTable<Result<Value>>>,
    hooks: Arc<RwLock<Hooks>>,
    relay: Option<HostErrorRelay>,
}

impl Router {
    async fn run(self, mut receiver: LinkReceiver) {
        while let Some(message) = receiver.recv().await {
            match message {
                Message::Reply(reply) => {
                    let result = reply.outcome.map_err(|payload| self.error(payload));
                    self.pending.resolve(reply.id, result);
                }
                Message::Event(event) => self.event(event),
                Message::Shutdown => break,
                Message::Call(call) => {
                    tracing::warn!(id = call.id, function = %call.function, "call from engine context ignored")
                }
            }
        }
        tracing::debug!("engine link closed");
    }

    /// Decode a reply error, restoring the original host error when it was
    /// relayed.
    fn error(&self, payload: ErrorPayload) -> BridgeError {
        if payload.kind == "host" {
            let relayed = self.relay.as_ref().and_then(|relay| relay.lock().take());
            if let Some(error) = relayed.filter(|error| error.to_string() == payload.message) {
                return BridgeError::Host(error);
            }
        }
        BridgeError::from_payload(payload)
    }

    fn event(&self, event: EventEnvelope) {
        let kind = event.kind;
        let fields = match event.outcome {
            Ok(Value::List(fields)) => fields,
            Ok(_) | Err(_) => {
                tracing::trace!(event = %kind, "engine event");
                return;
            }
        };
        let [name, position, third] = <[Value; 3]>::try_from(fields).unwrap_or_default();
        let name = name.as_str().map(str::to_owned).unwrap_or_default();
        let position = position.as_int().unwrap_or(0).max(0) as u64;
        tracing::trace!(event = %kind, device = %name, position, "engine event");

        match kind {
            EventKind::Read => {
                let request = ReadRequest {
                    name: name.clone(),
                    position,
                    length: third.as_int().unwrap_or(0).max(0) as usize,
                };
                let hook = self.hooks.read().read.clone();
                self.run_hook(hook.map(|hook| hook(request)), Builtin::ReaderDevSend, move |options| {
                    vec![Value::Str(name), Value::Null, options]
                });
            }
            EventKind::BlockRead => {
                let request = ReadRequest {
                    name: name.clone(),
                    position,
                    length: third.as_int().unwrap_or(0).max(0) as usize,
                };
                let hook = self.hooks.read().block_read.clone();
                self.run_hook(hook.map(|hook| hook(request)), Builtin::BlockReaderDevSend, move |options| {
                    vec![Value::Str(name), Value::Int(position as i64), Value::Null, options]
                });
            }
            EventKind::Write => {
                let data = match third {
                    Value::Buffer(buffer) => buffer.into_bytes(),
                    _ => bytes::Bytes::new(),
                };
                let hook = self.hooks.read().write.clone();
                match hook {
                    Some(hook) => {
                        let written = hook(WriteRequest {
                            name: name.clone(),
                            position,
                            data,
                        });
                        tokio::spawn(async move {
                            if let Err(error) = written.await {
                                tracing::warn!(device = %name, %error, "write hook failed");
                            }
                        });
                    }
                    None => tracing::warn!(device = %name, "no write hook registered; data dropped"),
                }
            }
            EventKind::Ready | EventKind::Error => {}
        }
    }

    /// Finish a read hook in the background. A failure, or a missing hook,
    /// is fed back to the device through `report`.
    fn run_hook(
        &self,
        hook: Option<HookFuture>,
        report: Builtin,
        args: impl FnOnce(Value) -> Vec<Value> + Send + 'static,
    ) {
        let notifier = Notifier {
            sender: self.sender.clone(),
            pending: Arc::clone(&self.pending),
        };
        match hook {
            Some(hook) => {
                tokio::spawn(async move {
                    if let Err(error) = hook.await {
                        tracing::debug!(%error, "read hook failed");
                        let options = Value::map([("error", Value::Str(error.to_string()))]);
                        notifier.notify(report, args(options));
                    }
                });
            }
            None => {
                tracing::debug!(function = report.name(), "no read hook registered");
                let options = Value::map([("error_code", Value::Int(EIO as i64))]);
                notifier.notify(report, args(options));
            }
        }
    }
}

/// Forgets a call's pending entry when its caller stops waiting, whether
/// the reply arrived, sending failed or the call future was dropped.
struct Outstanding {
    pending: Arc<PendingTable<Result<Value>>>,
    id: u64,
}

impl Drop for Outstanding {
    fn drop(&mut self) {
        if self.pending.cancel(self.id) {
            tracing::trace!(id = self.id, "abandoned call forgotten");
        }
    }
}

/// Fire-and-forget calls from the router.
struct Notifier {
    sender: LinkSender,
    pending: Arc<PendingTable<Result<Value>>>,
}

impl Notifier {
    fn notify(&self, function: Builtin, args: Vec<Value>) {
        let Ok((id, _reply)) = self.pending.register() else {
            return;
        };
        let call = CallEnvelope {
            id,
            function: function.name().to_string(),
            args,
        };
        if self.sender.send(Message::Call(call)).is_err() {
            self.pending.cancel(id);
        }
    }
}
