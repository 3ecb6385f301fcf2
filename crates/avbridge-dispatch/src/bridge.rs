//! The bridge handle: one async call surface over every topology.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use avbridge_device::{
    create_file, DeviceTable, HostError, Hooks, ReadRequest, ReadaheadSource, SendOptions, WriteRequest,
};
use avbridge_engine::codes::is_again;
use avbridge_engine::{EngineFactory, Handle, Variant};
use avbridge_marshal::{Buffer, Value};
use avbridge_protocol::ProtocolError;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::BridgeConfig;
use crate::context::Outcome;
use crate::direct::Direct;
use crate::error::{BridgeError, Result};
use crate::function::{Builtin, Function, FunctionKind};
use crate::mode::{select_mode, Mode};
use crate::remote::RemoteClient;
use crate::serializer::Serializer;
use crate::{channel, devices, threadpool};

enum Backend {
    Direct(Direct),
    Channel(RemoteClient),
    ThreadPool {
        client: RemoteClient,
        devices: Arc<DeviceTable>,
    },
}

impl Backend {
    fn call(&self, function: Function, args: Vec<Value>) -> BoxFuture<'static, Result<Value>> {
        match self {
            Backend::Direct(direct) => direct.call(function, args),
            Backend::Channel(client) => client.call(function, args),
            Backend::ThreadPool { client, devices } => match function {
                Function::Builtin(builtin) if builtin.kind() == FunctionKind::Device => {
                    let devices = Arc::clone(devices);
                    async move {
                        match devices::call(&devices, builtin, args)? {
                            Outcome::Ready(value) => Ok(value),
                            Outcome::Pending(pending) => pending.await,
                        }
                    }
                    .boxed()
                }
                _ => client.call(function, args),
            },
        }
    }

    /// The device table, when it lives on the host side.
    fn host_devices(&self) -> Option<&Arc<DeviceTable>> {
        match self {
            Backend::Direct(direct) => Some(direct.devices()),
            Backend::ThreadPool { devices, .. } => Some(devices),
            Backend::Channel(_) => None,
        }
    }
}

/// Calls made from inside [`Bridge::serially`]. They skip the serializer,
/// since the enclosing operation already holds the turn.
#[derive(Clone)]
pub struct Caller {
    backend: Arc<Backend>,
}

impl Caller {
    pub async fn call(&self, function: impl Into<Function>, args: Vec<Value>) -> Result<Value> {
        self.backend.call(function.into(), args).await
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Caller")
    }
}

/// Packets gathered by [`Bridge::read_frame_multi_until`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadBatch {
    /// The read code that ended the batch: `EAGAIN` when the size limit was
    /// reached, `AVERROR_EOF` at end of input, or an engine failure code.
    pub code: i32,
    /// Packets keyed by stream index (or `"0"` when unified).
    pub packets: BTreeMap<String, Vec<Value>>,
}

/// Handle to one engine instance.
pub struct Bridge {
    backend: Arc<Backend>,
    mode: Mode,
    variant: Variant,
    serializer: Serializer,
    config: BridgeConfig,
}

impl Bridge {
    /// Select a topology for `config`, load the engine in it and wait until
    /// it is ready. Any failure fails the whole creation.
    pub async fn create(factory: Arc<dyn EngineFactory>, config: BridgeConfig) -> Result<Self> {
        let parallelism = std::thread::available_parallelism().map_or(1, |n| n.get());
        let (mode, variant) = select_mode(&config, factory.capabilities(), parallelism)?;
        let backend = match mode {
            Mode::Direct => Backend::Direct(Direct::load(
                factory.as_ref(),
                variant,
                avbridge_device::DeviceConfig {
                    block_size: config.block_size,
                    blocking_reads: false,
                },
            )?),
            Mode::Channel => Backend::Channel(channel::start(factory, variant, &config).await?),
            Mode::ThreadPool => {
                let (client, devices) = threadpool::start(factory, variant, &config).await?;
                Backend::ThreadPool { client, devices }
            }
        };
        tracing::info!(%mode, ?variant, "bridge created");
        Ok(Self {
            backend: Arc::new(backend),
            mode,
            variant,
            serializer: Serializer::new(),
            config,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Call `function`. Metafunctions are ordered through the serializer;
    /// primitives and device functions run as soon as they are polled.
    pub async fn call(&self, function: impl Into<Function>, args: Vec<Value>) -> Result<Value> {
        let function = function.into();
        let call = self.backend.call(function, args);
        let call = if function.kind() == FunctionKind::Meta {
            self.serializer.enqueue(call).boxed()
        } else {
            call
        };
        match self.config.call_timeout() {
            Some(after) => tokio::time::timeout(after, call).await.map_err(|_| BridgeError::Timeout {
                function: function.name().into_owned(),
                after,
            })?,
            None => call.await,
        }
    }

    pub async fn call_by_name(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let function: Function = name.parse()?;
        self.call(function, args).await
    }

    /// Run `function` to completion on the calling thread. Direct mode only.
    pub fn call_sync(&self, function: impl Into<Function>, args: Vec<Value>) -> Result<Value> {
        match self.backend.as_ref() {
            Backend::Direct(direct) => direct.call_sync(function.into(), args),
            _ => Err(BridgeError::SyncUnavailable(self.mode)),
        }
    }

    /// Run a compound operation under the serializer. Calls made through the
    /// [`Caller`] are not serialized again.
    pub async fn serially<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Caller) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let caller = Caller {
            backend: Arc::clone(&self.backend),
        };
        self.serializer.enqueue(op(caller)).await
    }

    /// Stop the engine context. Calls still outstanding never resolve and
    /// new calls fail with [`BridgeError::Terminated`]. A no-op in direct
    /// mode.
    pub fn terminate(&self) {
        match self.backend.as_ref() {
            Backend::Direct(_) => {}
            Backend::Channel(client) => client.terminate(),
            Backend::ThreadPool { client, devices } => {
                client.terminate();
                // a command thread parked in a read gives up
                devices.cancel_all();
            }
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self.backend.as_ref() {
            Backend::Direct(_) => false,
            Backend::Channel(client) | Backend::ThreadPool { client, .. } => client.is_terminated(),
        }
    }

    /// Calls sent to an isolated engine context that are still waiting for
    /// a reply. Always zero in direct mode.
    pub fn outstanding_calls(&self) -> usize {
        match self.backend.as_ref() {
            Backend::Direct(_) => 0,
            Backend::Channel(client) | Backend::ThreadPool { client, .. } => client.outstanding(),
        }
    }

    // ---- hooks -----------------------------------------------------------

    /// Replace all three hook slots.
    pub fn set_hooks(&self, hooks: Hooks) {
        match self.backend.as_ref() {
            Backend::Channel(client) => client.set_hooks(hooks),
            Backend::Direct(direct) => direct.devices().set_hooks(hooks),
            Backend::ThreadPool { devices, .. } => devices.set_hooks(hooks),
        }
    }

    fn update_hooks(&self, hooks: Hooks) {
        match self.backend.as_ref() {
            Backend::Channel(client) => client.update_hooks(|slots| {
                slots.read = hooks.read.or(slots.read.take());
                slots.block_read = hooks.block_read.or(slots.block_read.take());
                slots.write = hooks.write.or(slots.write.take());
            }),
            Backend::Direct(_) | Backend::ThreadPool { .. } => {
                let Some(devices) = self.backend.host_devices() else {
                    return;
                };
                if let Some(read) = hooks.read {
                    devices.set_read_hook(Some(read));
                }
                if let Some(block_read) = hooks.block_read {
                    devices.set_block_read_hook(Some(block_read));
                }
                if let Some(write) = hooks.write {
                    devices.set_write_hook(Some(write));
                }
            }
        }
    }

    /// Called when a stream reader runs dry.
    pub fn on_read<F, Fut>(&self, hook: F)
    where
        F: Fn(ReadRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HostError>> + Send + 'static,
    {
        self.update_hooks(Hooks::default().on_read(hook));
    }

    /// Called when a block reader needs a block outside its window.
    pub fn on_block_read<F, Fut>(&self, hook: F)
    where
        F: Fn(ReadRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HostError>> + Send + 'static,
    {
        self.update_hooks(Hooks::default().on_block_read(hook));
    }

    /// Called with every write to a writer device.
    pub fn on_write<F, Fut>(&self, hook: F)
    where
        F: Fn(WriteRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HostError>> + Send + 'static,
    {
        self.update_hooks(Hooks::default().on_write(hook));
    }

    // ---- devices ---------------------------------------------------------

    async fn device(&self, function: Builtin, args: Vec<Value>) -> Result<()> {
        self.call(function, args).await.map(drop)
    }

    pub async fn make_reader(&self, name: &str) -> Result<()> {
        self.device(Builtin::MkReaderDev, vec![name.into()]).await
    }

    pub async fn make_block_reader(&self, name: &str, size: u64) -> Result<()> {
        self.device(Builtin::MkBlockReaderDev, vec![name.into(), Value::Int(size as i64)])
            .await
    }

    pub async fn make_writer(&self, name: &str) -> Result<()> {
        self.device(Builtin::MkWriterDev, vec![name.into()]).await
    }

    pub async fn make_stream_writer(&self, name: &str) -> Result<()> {
        self.device(Builtin::MkStreamWriterDev, vec![name.into()]).await
    }

    pub async fn mount_writer_fs(&self, prefix: &str) -> Result<()> {
        self.device(Builtin::MountWriterFs, vec![prefix.into()]).await
    }

    pub async fn unmount_writer_fs(&self, prefix: &str) -> Result<()> {
        self.device(Builtin::UnmountWriterFs, vec![prefix.into()]).await
    }

    /// Block reader served from `source` with read-ahead. Custom sources
    /// only work where the device table is on the host side.
    pub async fn make_readahead_file(&self, name: &str, source: ReadaheadSource) -> Result<()> {
        if let Some(devices) = self.backend.host_devices() {
            return Ok(devices.make_readahead(name, source)?);
        }
        let source = match source {
            ReadaheadSource::Memory(bytes) => Value::Buffer(Buffer::new(bytes)),
            ReadaheadSource::File(path) => Value::Str(path.to_string_lossy().into_owned()),
            ReadaheadSource::Custom(_) => {
                return Err(BridgeError::Config(format!(
                    "{name}: custom read-ahead sources cannot cross to the engine context"
                )))
            }
        };
        self.device(Builtin::MkReadaheadFile, vec![name.into(), source]).await
    }

    pub async fn unlink_readahead_file(&self, name: &str) -> Result<()> {
        self.device(Builtin::UnlinkReadaheadFile, vec![name.into()]).await
    }

    /// Writer whose bytes land in the host file at `path`.
    pub async fn make_handle_writer_file(&self, name: &str, path: &Path) -> Result<()> {
        if let Some(devices) = self.backend.host_devices() {
            return Ok(devices.make_handle_writer(name, create_file(path))?);
        }
        let path = path.to_string_lossy().into_owned();
        self.device(Builtin::MkFsfhFile, vec![name.into(), path.into()]).await
    }

    /// Unlink a handle writer once its queued writes are applied.
    pub async fn unlink_handle_writer_file(&self, name: &str) -> Result<()> {
        self.device(Builtin::UnlinkFsfhFile, vec![name.into()]).await
    }

    /// Expose `data` as a file; returns the path to open it by.
    pub async fn make_workerfs_file(&self, name: &str, data: Bytes) -> Result<String> {
        let path = self
            .call(Builtin::MkWorkerfsFile, vec![name.into(), Buffer::new(data).into()])
            .await?;
        path.as_str()
            .map(str::to_owned)
            .map_err(|e| BridgeError::Protocol(ProtocolError::Malformed(e.to_string())))
    }

    pub async fn unlink(&self, name: &str) -> Result<()> {
        self.device(Builtin::Unlink, vec![name.into()]).await
    }

    pub async fn read_file(&self, name: &str) -> Result<Bytes> {
        match self.call(Builtin::ReadFile, vec![name.into()]).await? {
            Value::Buffer(buffer) => Ok(buffer.into_bytes()),
            other => Err(BridgeError::Protocol(ProtocolError::Malformed(format!(
                "readFile returned {}",
                other.kind()
            )))),
        }
    }

    pub async fn write_file(&self, name: &str, data: Bytes) -> Result<()> {
        self.device(Builtin::WriteFile, vec![name.into(), Buffer::new(data).into()])
            .await
    }

    /// Feed a stream reader; `None` marks end of stream. A host error in
    /// `options` is re-raised unchanged where the device table is on the
    /// host side, and by message otherwise.
    pub async fn reader_send(&self, name: &str, data: Option<Bytes>, options: SendOptions) -> Result<()> {
        if let Some(devices) = self.backend.host_devices() {
            return Ok(devices.reader_send(name, data, options)?);
        }
        let data = data.map(|bytes| Value::Buffer(Buffer::new(bytes))).unwrap_or_default();
        self.device(Builtin::ReaderDevSend, vec![name.into(), data, send_options(options)])
            .await
    }

    /// Replace a block reader's window.
    pub async fn block_reader_send(
        &self,
        name: &str,
        position: u64,
        data: Option<Bytes>,
        options: SendOptions,
    ) -> Result<()> {
        if let Some(devices) = self.backend.host_devices() {
            return Ok(devices.block_reader_send(name, position, data, options)?);
        }
        let data = data.map(|bytes| Value::Buffer(Buffer::new(bytes))).unwrap_or_default();
        let args = vec![name.into(), Value::Int(position as i64), data, send_options(options)];
        self.device(Builtin::BlockReaderDevSend, args).await
    }

    pub async fn reader_ready(&self, name: &str) -> Result<bool> {
        let ready = self.call(Builtin::ReaderDevReady, vec![name.into()]).await?;
        Ok(ready.as_bool().unwrap_or(false))
    }

    /// Resolve once `name` is ready to be read again.
    pub async fn wait_reader(&self, name: &str) -> Result<()> {
        self.device(Builtin::ReaderDevWait, vec![name.into()]).await
    }

    // ---- compound helpers --------------------------------------------------

    /// Open and probe `filename`, waiting on `device` (the file itself by
    /// default) whenever probing runs out of data.
    pub async fn init_demuxer_file(
        &self,
        filename: &str,
        format: Option<&str>,
        device: Option<&str>,
    ) -> Result<Value> {
        let filename = filename.to_string();
        let format = Value::from(format);
        let device = device.unwrap_or(&filename).to_string();
        self.serially(move |caller| async move {
            loop {
                let args = vec![filename.clone().into(), format.clone()];
                match caller.call(Builtin::InitDemuxerFile, args).await {
                    Err(error) if error.is_again() => {
                        tracing::trace!(device = %device, "demuxer waiting for data");
                        caller.call(Builtin::ReaderDevWait, vec![device.clone().into()]).await?;
                    }
                    other => return other,
                }
            }
        })
        .await
    }

    /// Read packets until the size limit in `options`, end of input or a
    /// failure. When `device` runs dry the read waits for it and resumes.
    pub async fn read_frame_multi_until(
        &self,
        fmt_ctx: Handle,
        pkt: Handle,
        device: &str,
        options: Value,
    ) -> Result<ReadBatch> {
        let device = device.to_string();
        self.serially(move |caller| async move {
            let mut batch = ReadBatch::default();
            loop {
                let args = vec![fmt_ctx.into(), pkt.into(), options.clone()];
                let (code, packets) = split_read(caller.call(Builtin::ReadFrameMulti, args).await?)?;
                for (stream, mut list) in packets {
                    batch.packets.entry(stream).or_default().append(&mut list);
                }
                batch.code = code;
                if is_again(code) {
                    let ready = caller
                        .call(Builtin::ReaderDevReady, vec![device.clone().into()])
                        .await?;
                    if !ready.as_bool().unwrap_or(true) {
                        caller.call(Builtin::ReaderDevWait, vec![device.clone().into()]).await?;
                        continue;
                    }
                }
                return Ok(batch);
            }
        })
        .await
    }

    /// Description of an engine status code.
    pub async fn describe(&self, code: i32) -> Result<String> {
        let text = self.call(Builtin::Error, vec![Value::Int(code as i64)]).await?;
        Ok(text.as_str().map(str::to_owned).unwrap_or_default())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("mode", &self.mode)
            .field("variant", &self.variant)
            .field("serializer", &self.serializer)
            .finish()
    }
}

fn send_options(options: SendOptions) -> Value {
    let mut map = BTreeMap::new();
    if let Some(code) = options.error_code {
        map.insert("error_code".to_string(), Value::Int(code as i64));
    }
    if let Some(error) = options.error {
        map.insert("error".to_string(), Value::Str(error.to_string()));
    }
    Value::Map(map)
}

/// `[code, {stream: packets}]`
fn split_read(reply: Value) -> Result<(i32, BTreeMap<String, Vec<Value>>)> {
    let malformed = |what: &str| BridgeError::Protocol(ProtocolError::Malformed(format!("ff_read_frame_multi: {what}")));
    let Value::List(items) = reply else {
        return Err(malformed("expected [code, packets]"));
    };
    let [code, packets] = <[Value; 2]>::try_from(items).map_err(|_| malformed("expected [code, packets]"))?;
    let code = code.as_int().map_err(|_| malformed("code is not an integer"))? as i32;
    let packets = match packets {
        Value::Map(map) => map
            .into_iter()
            .map(|(stream, list)| (stream, list.into_list().unwrap_or_default()))
            .collect(),
        Value::Null => BTreeMap::new(),
        _ => return Err(malformed("packets are not a map")),
    };
    Ok((code, packets))
}
