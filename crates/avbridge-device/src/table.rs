//! The device table and its filesystem traps.
//!
//! Every name the engine can open lives here: stream readers, block
//! readers, writers, stream writers and plain in-memory files. The engine
//! reaches them only through [`Vfs`]; the host feeds them through the
//! `*_send` operations and is notified through [`Hooks`].
//!
//! Hooks are always called with no table lock held, so a hook may feed the
//! device synchronously before returning.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use avbridge_engine::{Errno, Fd, OpenFlags, Vfs, Whence};
use bytes::{Buf, Bytes, BytesMut};
use futures::channel::oneshot;
use parking_lot::{Mutex, RwLock};

use crate::config::DeviceConfig;
use crate::error::{DeviceError, HostError, Result};
use crate::handle_writer::{self, HostFileOpener, Op, OpSender};
use crate::hooks::{Driver, Hooks, ReadHook, ReadRequest, WriteHook, WriteRequest};
use crate::readahead::{Readahead, ReadaheadSource};
use crate::waiters::{WaitHandle, WaiterRegistry};

/// Kind of a registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    StreamReader,
    BlockReader,
    Writer,
    StreamWriter,
    MemFile,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::StreamReader => "stream reader",
            DeviceKind::BlockReader => "block reader",
            DeviceKind::Writer => "writer",
            DeviceKind::StreamWriter => "stream writer",
            DeviceKind::MemFile => "file",
        }
    }

    pub fn is_reader(self) -> bool {
        matches!(self, DeviceKind::StreamReader | DeviceKind::BlockReader)
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error state delivered with a send. Both fields replace whatever the
/// previous send left behind.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Positive errno every subsequent read fails with.
    pub error_code: Option<i32>,
    /// Host error re-raised at the engine call that reads next.
    pub error: Option<HostError>,
}

impl SendOptions {
    pub fn error(error: HostError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn error_code(code: i32) -> Self {
        Self {
            error_code: Some(code),
            ..Self::default()
        }
    }
}

enum Body {
    Stream { pending: BytesMut, eof: bool },
    Block { window: Bytes, start: u64, size: u64 },
    Writer { stream: bool, cursor: u64 },
    File(Vec<u8>),
}

struct Device {
    body: Body,
    ready: bool,
    error_code: i32,
    error: Option<HostError>,
}

impl Device {
    fn new(body: Body) -> Self {
        Self {
            body,
            ready: false,
            error_code: 0,
            error: None,
        }
    }

    fn kind(&self) -> DeviceKind {
        match &self.body {
            Body::Stream { .. } => DeviceKind::StreamReader,
            Body::Block { .. } => DeviceKind::BlockReader,
            Body::Writer { stream: false, .. } => DeviceKind::Writer,
            Body::Writer { stream: true, .. } => DeviceKind::StreamWriter,
            Body::File(_) => DeviceKind::MemFile,
        }
    }

    fn apply(&mut self, options: SendOptions) {
        self.ready = true;
        self.error_code = options.error_code.unwrap_or(0);
        self.error = options.error;
    }
}

struct OpenFile {
    name: String,
    position: u64,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, Device>,
    files: HashMap<u32, OpenFile>,
    next_fd: u32,
    mounts: Vec<String>,
}

enum ReadStep {
    Done(usize),
    NotReady(String),
}

enum WriteSink {
    Handle(OpSender),
    Hook(WriteHook),
    None,
}

/// Registry of virtual devices for one engine instance.
pub struct DeviceTable {
    this: Weak<DeviceTable>,
    config: DeviceConfig,
    driver: Driver,
    inner: Mutex<Inner>,
    waiters: WaiterRegistry,
    hooks: RwLock<Hooks>,
    thrown: Mutex<Option<HostError>>,
    readaheads: Mutex<HashMap<String, Arc<Readahead>>>,
    handle_writers: Mutex<HashMap<String, OpSender>>,
}

impl DeviceTable {
    /// Create a table. Background work is bound to the tokio runtime the
    /// caller is on, if any.
    pub fn new(config: DeviceConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            driver: Driver::capture(),
            inner: Mutex::new(Inner {
                next_fd: 3,
                ..Inner::default()
            }),
            waiters: WaiterRegistry::new(),
            hooks: RwLock::new(Hooks::default()),
            thrown: Mutex::new(None),
            readaheads: Mutex::new(HashMap::new()),
            handle_writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn waiters(&self) -> &WaiterRegistry {
        &self.waiters
    }

    // ---- hooks -----------------------------------------------------------

    pub fn set_hooks(&self, hooks: Hooks) {
        *self.hooks.write() = hooks;
    }

    pub fn hooks(&self) -> Hooks {
        self.hooks.read().clone()
    }

    pub fn set_read_hook(&self, hook: Option<ReadHook>) {
        self.hooks.write().read = hook;
    }

    pub fn set_block_read_hook(&self, hook: Option<ReadHook>) {
        self.hooks.write().block_read = hook;
    }

    pub fn set_write_hook(&self, hook: Option<WriteHook>) {
        self.hooks.write().write = hook;
    }

    // ---- registration ----------------------------------------------------

    fn insert(&self, name: &str, body: Body) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.devices.contains_key(name) {
            return Err(DeviceError::AlreadyExists(name.to_string()));
        }
        let device = Device::new(body);
        tracing::debug!(device = name, kind = %device.kind(), "device created");
        inner.devices.insert(name.to_string(), device);
        Ok(())
    }

    pub fn make_reader(&self, name: &str) -> Result<()> {
        self.insert(
            name,
            Body::Stream {
                pending: BytesMut::new(),
                eof: false,
            },
        )
    }

    pub fn make_block_reader(&self, name: &str, size: u64) -> Result<()> {
        self.insert(
            name,
            Body::Block {
                window: Bytes::new(),
                start: 0,
                size,
            },
        )
    }

    pub fn make_writer(&self, name: &str) -> Result<()> {
        self.insert(
            name,
            Body::Writer {
                stream: false,
                cursor: 0,
            },
        )
    }

    pub fn make_stream_writer(&self, name: &str) -> Result<()> {
        self.insert(
            name,
            Body::Writer {
                stream: true,
                cursor: 0,
            },
        )
    }

    /// Block reader whose block reads are served from `source`, fetching
    /// one block ahead.
    pub fn make_readahead(&self, name: &str, source: ReadaheadSource) -> Result<()> {
        let source = source.into_source()?;
        let readahead = Arc::new(Readahead::new(source, self.config.block_size));
        self.make_block_reader(name, readahead.size())?;
        self.readaheads.lock().insert(name.to_string(), readahead);
        Ok(())
    }

    pub fn unlink_readahead(&self, name: &str) -> Result<()> {
        if self.readaheads.lock().remove(name).is_none() {
            return Err(DeviceError::WrongKind {
                name: name.to_string(),
                expected: "read-ahead device",
            });
        }
        self.unlink(name)
    }

    /// Writer whose bytes go, in order, to the host resource `opener`
    /// produces. The resource is opened on the first write.
    pub fn make_handle_writer(&self, name: &str, opener: HostFileOpener) -> Result<()> {
        self.make_writer(name)?;
        let sender = handle_writer::start(name.to_string(), opener, self.this.clone(), &self.driver);
        self.handle_writers.lock().insert(name.to_string(), sender);
        Ok(())
    }

    /// Unlink a handle writer once every queued write has been applied and
    /// the host resource is closed.
    pub async fn unlink_handle_writer(&self, name: &str) -> Result<()> {
        let sender = self.handle_writers.lock().remove(name).ok_or_else(|| {
            DeviceError::WrongKind {
                name: name.to_string(),
                expected: "handle writer",
            }
        })?;
        let _ = self.unlink(name);
        let (done_tx, done_rx) = oneshot::channel();
        if sender.send(Op::Close(done_tx)).is_err() {
            return Ok(());
        }
        match done_rx.await {
            Ok(closed) => closed.map_err(DeviceError::Io),
            Err(_) => Ok(()),
        }
    }

    /// Treat every file created under `prefix` as a writer device.
    pub fn mount_writer_fs(&self, prefix: &str) -> Result<()> {
        let prefix = normalize_prefix(prefix);
        let mut inner = self.inner.lock();
        if inner.mounts.contains(&prefix) {
            return Err(DeviceError::AlreadyMounted(prefix));
        }
        tracing::debug!(prefix = %prefix, "writer filesystem mounted");
        inner.mounts.push(prefix);
        Ok(())
    }

    /// Remove a writer mount and every device created under it.
    pub fn unmount_writer_fs(&self, prefix: &str) -> Result<()> {
        let prefix = normalize_prefix(prefix);
        let removed: Vec<String> = {
            let mut inner = self.inner.lock();
            let Some(at) = inner.mounts.iter().position(|m| *m == prefix) else {
                return Err(DeviceError::NotMounted(prefix));
            };
            inner.mounts.remove(at);
            let names: Vec<String> = inner
                .devices
                .keys()
                .filter(|name| name.starts_with(&prefix))
                .cloned()
                .collect();
            for name in &names {
                inner.devices.remove(name);
            }
            names
        };
        for name in &removed {
            self.waiters.cancel(name);
        }
        tracing::debug!(prefix = %prefix, devices = removed.len(), "writer filesystem unmounted");
        Ok(())
    }

    /// Create or replace an in-memory file.
    pub fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.devices.get_mut(name) {
            Some(Device {
                body: Body::File(content),
                ..
            }) => {
                content.clear();
                content.extend_from_slice(data);
            }
            Some(_) => {
                return Err(DeviceError::WrongKind {
                    name: name.to_string(),
                    expected: DeviceKind::MemFile.as_str(),
                });
            }
            None => {
                inner
                    .devices
                    .insert(name.to_string(), Device::new(Body::File(data.to_vec())));
            }
        }
        Ok(())
    }

    /// Contents of an in-memory file.
    pub fn read_file(&self, name: &str) -> Result<Bytes> {
        match self.inner.lock().devices.get(name) {
            Some(Device {
                body: Body::File(content),
                ..
            }) => Ok(Bytes::copy_from_slice(content)),
            Some(_) => Err(DeviceError::WrongKind {
                name: name.to_string(),
                expected: DeviceKind::MemFile.as_str(),
            }),
            None => Err(DeviceError::NotRegistered(name.to_string())),
        }
    }

    /// Expose `data` as a file at `/{name}.d/{name}` and return that path.
    pub fn make_workerfs_file(&self, name: &str, data: &[u8]) -> Result<String> {
        let path = workerfs_path(name);
        if self.inner.lock().devices.contains_key(&path) {
            return Err(DeviceError::AlreadyExists(path));
        }
        self.write_file(&path, data)?;
        Ok(path)
    }

    pub fn unlink_workerfs_file(&self, name: &str) -> Result<()> {
        self.unlink(&workerfs_path(name))
    }

    /// Remove `name`. Waiters on the name are cancelled whether or not it is
    /// registered.
    pub fn unlink(&self, name: &str) -> Result<()> {
        let removed = self.inner.lock().devices.remove(name);
        self.readaheads.lock().remove(name);
        self.handle_writers.lock().remove(name);
        let cancelled = self.waiters.cancel(name);
        match removed {
            Some(device) => {
                tracing::debug!(device = name, kind = %device.kind(), cancelled, "device unlinked");
                Ok(())
            }
            None => Err(DeviceError::NotRegistered(name.to_string())),
        }
    }

    pub fn kind(&self, name: &str) -> Option<DeviceKind> {
        self.inner.lock().devices.get(name).map(Device::kind)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().devices.keys().cloned().collect();
        names.sort();
        names
    }

    // ---- host side feeding -----------------------------------------------

    /// Append to a stream reader, or mark end of stream when `data` is
    /// `None`. Wakes the name's waiters.
    pub fn reader_send(&self, name: &str, data: Option<Bytes>, options: SendOptions) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            let device = inner
                .devices
                .get_mut(name)
                .ok_or_else(|| DeviceError::NotRegistered(name.to_string()))?;
            let Body::Stream { pending, eof } = &mut device.body else {
                return Err(DeviceError::WrongKind {
                    name: name.to_string(),
                    expected: DeviceKind::StreamReader.as_str(),
                });
            };
            match data {
                Some(data) => pending.extend_from_slice(&data),
                None => *eof = true,
            }
            device.apply(options);
        }
        self.waiters.wake(name);
        Ok(())
    }

    /// Replace a block reader's window with `data` at `position`. `None`
    /// leaves an empty window. Wakes the name's waiters.
    pub fn block_reader_send(
        &self,
        name: &str,
        position: u64,
        data: Option<Bytes>,
        options: SendOptions,
    ) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            let device = inner
                .devices
                .get_mut(name)
                .ok_or_else(|| DeviceError::NotRegistered(name.to_string()))?;
            let Body::Block { window, start, .. } = &mut device.body else {
                return Err(DeviceError::WrongKind {
                    name: name.to_string(),
                    expected: DeviceKind::BlockReader.as_str(),
                });
            };
            *start = position;
            *window = data.unwrap_or_default();
            device.apply(options);
        }
        self.waiters.wake(name);
        Ok(())
    }

    /// Store a host failure in a writer's error slot. The next write to it
    /// re-raises the failure.
    pub(crate) fn fail_writer(&self, name: &str, error: HostError) {
        if let Some(device) = self.inner.lock().devices.get_mut(name) {
            device.error = Some(error);
        }
    }

    pub fn is_ready(&self, name: &str) -> Result<bool> {
        self.inner
            .lock()
            .devices
            .get(name)
            .map(|device| device.ready)
            .ok_or_else(|| DeviceError::NotRegistered(name.to_string()))
    }

    /// Resolve once `name` is ready: immediately if it already is,
    /// otherwise on the next send to it.
    pub fn wait_ready(&self, name: &str) -> Result<WaitHandle> {
        let inner = self.inner.lock();
        let device = inner
            .devices
            .get(name)
            .ok_or_else(|| DeviceError::NotRegistered(name.to_string()))?;
        if !device.kind().is_reader() {
            return Err(DeviceError::WrongKind {
                name: name.to_string(),
                expected: "reader device",
            });
        }
        if device.ready {
            return Ok(WaitHandle::ready());
        }
        // registered under the table lock so a concurrent send cannot slip
        // between the check and the registration
        Ok(self.waiters.wait(name))
    }

    /// Whether anything is waiting on `name`, or on any device.
    pub fn is_waiting(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) => self.waiters.pending(name) > 0,
            None => self.waiters.any_pending(),
        }
    }

    /// Cancel every waiter on every device.
    pub fn cancel_all(&self) -> usize {
        self.waiters.cancel_all()
    }

    /// Take the host error raised by the last trap that failed with
    /// `ECANCELED`.
    pub fn take_thrown_error(&self) -> Option<HostError> {
        self.thrown.lock().take()
    }

    fn throw(&self, error: HostError) -> Errno {
        *self.thrown.lock() = Some(error);
        Errno::ECANCELED
    }

    // ---- trap internals --------------------------------------------------

    fn request_read(&self, kind: DeviceKind, request: ReadRequest) -> std::result::Result<(), Errno> {
        let name = request.name.clone();
        let table = self.this.clone();
        match kind {
            DeviceKind::StreamReader => {
                let hook = self.hooks.read().read.clone().ok_or(Errno::EIO)?;
                tracing::trace!(device = %name, position = request.position, length = request.length, "read hook");
                self.driver.drive(hook(request), move |error| {
                    if let Some(table) = table.upgrade() {
                        let _ = table.reader_send(&name, None, SendOptions::error(error));
                    }
                });
            }
            _ => {
                let position = request.position;
                let readahead = self.readaheads.lock().get(&name).cloned();
                let pending = match readahead {
                    Some(readahead) => readahead.request(
                        self.this.clone(),
                        self.driver.clone(),
                        name.clone(),
                        request.position,
                        request.length,
                    ),
                    None => {
                        let hook = self.hooks.read().block_read.clone().ok_or(Errno::EIO)?;
                        tracing::trace!(device = %name, position, length = request.length, "block read hook");
                        hook(request)
                    }
                };
                self.driver.drive(pending, move |error| {
                    if let Some(table) = table.upgrade() {
                        let _ = table.block_reader_send(&name, position, None, SendOptions::error(error));
                    }
                });
            }
        }
        Ok(())
    }

    fn try_read(&self, fd: Fd, buf: &mut [u8]) -> std::result::Result<ReadStep, Errno> {
        let request = {
            let inner = self.inner.lock();
            let file = inner.files.get(&fd.0).ok_or(Errno::EINVAL)?;
            let device = inner.devices.get(&file.name).ok_or(Errno::ENOENT)?;
            let needs_data = match &device.body {
                Body::Stream { pending, eof } => pending.is_empty() && !eof,
                Body::Block { window, start, size } => {
                    device.error.is_none()
                        && device.error_code == 0
                        && !in_window(*start, window, file.position)
                        && file.position < *size
                }
                Body::Writer { .. } => return Err(Errno::EIO),
                Body::File(_) => false,
            };
            needs_data.then(|| {
                (
                    device.kind(),
                    ReadRequest {
                        name: file.name.clone(),
                        position: file.position,
                        length: buf.len(),
                    },
                )
            })
        };
        if let Some((kind, request)) = request {
            self.request_read(kind, request)?;
        }

        let mut inner = self.inner.lock();
        let Inner { devices, files, .. } = &mut *inner;
        let file = files.get_mut(&fd.0).ok_or(Errno::EINVAL)?;
        let device = devices.get_mut(&file.name).ok_or(Errno::ENOENT)?;
        if device.kind().is_reader() {
            if let Some(error) = device.error.clone() {
                return Err(self.throw(error));
            }
            if device.error_code != 0 {
                return Err(Errno(device.error_code));
            }
        }
        let n = match &mut device.body {
            Body::Stream { pending, eof } => {
                if pending.is_empty() {
                    if *eof {
                        return Ok(ReadStep::Done(0));
                    }
                    device.ready = false;
                    return Ok(ReadStep::NotReady(file.name.clone()));
                }
                let n = buf.len().min(pending.len());
                buf[..n].copy_from_slice(&pending[..n]);
                pending.advance(n);
                n
            }
            Body::Block { window, start, size } => {
                if !in_window(*start, window, file.position) {
                    if file.position >= *size {
                        return Ok(ReadStep::Done(0));
                    }
                    device.ready = false;
                    return Ok(ReadStep::NotReady(file.name.clone()));
                }
                let offset = (file.position - *start) as usize;
                let n = buf.len().min(window.len() - offset);
                buf[..n].copy_from_slice(&window[offset..offset + n]);
                n
            }
            Body::File(content) => {
                let offset = usize::try_from(file.position).unwrap_or(usize::MAX);
                if offset >= content.len() {
                    return Ok(ReadStep::Done(0));
                }
                let n = buf.len().min(content.len() - offset);
                buf[..n].copy_from_slice(&content[offset..offset + n]);
                n
            }
            Body::Writer { .. } => return Err(Errno::EIO),
        };
        file.position += n as u64;
        Ok(ReadStep::Done(n))
    }

    fn write_sink(&self, name: &str) -> WriteSink {
        if let Some(sender) = self.handle_writers.lock().get(name) {
            return WriteSink::Handle(sender.clone());
        }
        match self.hooks.read().write.clone() {
            Some(hook) => WriteSink::Hook(hook),
            None => WriteSink::None,
        }
    }
}

fn in_window(start: u64, window: &Bytes, position: u64) -> bool {
    position >= start && position < start + window.len() as u64
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    format!("{trimmed}/")
}

fn workerfs_path(name: &str) -> String {
    format!("/{name}.d/{name}")
}

impl Vfs for DeviceTable {
    fn open(&self, path: &str, flags: OpenFlags) -> std::result::Result<Fd, Errno> {
        let mut inner = self.inner.lock();
        let writable = flags.writable();
        if !inner.devices.contains_key(path) {
            if !flags.contains(OpenFlags::CREATE) || !writable {
                return Err(Errno::ENOENT);
            }
            let mounted = inner.mounts.iter().any(|m| path.starts_with(m.as_str()));
            let body = if mounted {
                Body::Writer {
                    stream: false,
                    cursor: 0,
                }
            } else {
                Body::File(Vec::new())
            };
            let device = Device::new(body);
            tracing::debug!(device = path, kind = %device.kind(), "device created on open");
            inner.devices.insert(path.to_string(), device);
        }
        let Some(device) = inner.devices.get_mut(path) else {
            return Err(Errno::ENOENT);
        };
        match &mut device.body {
            Body::Stream { .. } | Body::Block { .. } if writable => return Err(Errno::EPERM),
            Body::Writer { .. } if !writable => return Err(Errno::EPERM),
            Body::File(content) if writable && flags.contains(OpenFlags::TRUNCATE) => {
                content.clear()
            }
            _ => {}
        }
        let fd = inner.next_fd;
        inner.next_fd += 1;
        inner.files.insert(
            fd,
            OpenFile {
                name: path.to_string(),
                position: 0,
            },
        );
        tracing::trace!(device = path, fd, "opened");
        Ok(Fd(fd))
    }

    fn close(&self, fd: Fd) -> std::result::Result<(), Errno> {
        self.inner
            .lock()
            .files
            .remove(&fd.0)
            .map(|_| ())
            .ok_or(Errno::EINVAL)
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> std::result::Result<usize, Errno> {
        loop {
            match self.try_read(fd, buf)? {
                ReadStep::Done(n) => return Ok(n),
                ReadStep::NotReady(name) => {
                    if !self.config.blocking_reads {
                        return Err(Errno::EAGAIN);
                    }
                    let wait = self.wait_ready(&name).map_err(|_| Errno::ENOENT)?;
                    if wait.blocking_wait().is_err() {
                        return Err(Errno::ECANCELED);
                    }
                }
            }
        }
    }

    fn write(&self, fd: Fd, buf: &[u8]) -> std::result::Result<usize, Errno> {
        let (name, kind) = {
            let inner = self.inner.lock();
            let file = inner.files.get(&fd.0).ok_or(Errno::EINVAL)?;
            let device = inner.devices.get(&file.name).ok_or(Errno::ENOENT)?;
            (file.name.clone(), device.kind())
        };
        let sink = match kind {
            DeviceKind::StreamReader | DeviceKind::BlockReader => return Err(Errno::EIO),
            DeviceKind::Writer | DeviceKind::StreamWriter => self.write_sink(&name),
            DeviceKind::MemFile => WriteSink::None,
        };

        let position = {
            let mut inner = self.inner.lock();
            let Inner { devices, files, .. } = &mut *inner;
            let file = files.get_mut(&fd.0).ok_or(Errno::EINVAL)?;
            let device = devices.get_mut(&file.name).ok_or(Errno::ENOENT)?;
            match &mut device.body {
                Body::File(content) => {
                    let offset = usize::try_from(file.position).map_err(|_| Errno::EINVAL)?;
                    let end = offset.checked_add(buf.len()).ok_or(Errno::EINVAL)?;
                    if content.len() < end {
                        content.resize(end, 0);
                    }
                    content[offset..end].copy_from_slice(buf);
                    file.position = end as u64;
                    return Ok(buf.len());
                }
                Body::Writer { stream, cursor } => {
                    if let Some(error) = device.error.take() {
                        return Err(self.throw(error));
                    }
                    if matches!(sink, WriteSink::None) {
                        return Err(Errno::EIO);
                    }
                    if *stream && file.position != *cursor {
                        return Err(Errno::ESPIPE);
                    }
                    let position = file.position;
                    file.position += buf.len() as u64;
                    if *stream {
                        *cursor = file.position;
                    }
                    position
                }
                Body::Stream { .. } | Body::Block { .. } => return Err(Errno::EIO),
            }
        };

        let data = Bytes::copy_from_slice(buf);
        match sink {
            WriteSink::Handle(sender) => sender
                .send(Op::Write { position, data })
                .map_err(|_| Errno::EIO)?,
            WriteSink::Hook(hook) => {
                let table = self.this.clone();
                let failed = name.clone();
                self.driver.drive(
                    hook(WriteRequest {
                        name,
                        position,
                        data,
                    }),
                    move |error| {
                        if let Some(table) = table.upgrade() {
                            table.fail_writer(&failed, error);
                        }
                    },
                );
            }
            WriteSink::None => return Err(Errno::EIO),
        }
        Ok(buf.len())
    }

    fn seek(&self, fd: Fd, offset: i64, whence: Whence) -> std::result::Result<u64, Errno> {
        let mut inner = self.inner.lock();
        let Inner { devices, files, .. } = &mut *inner;
        let file = files.get_mut(&fd.0).ok_or(Errno::EINVAL)?;
        let device = devices.get(&file.name).ok_or(Errno::ENOENT)?;
        let end = match (&device.body, whence) {
            (Body::Stream { .. }, _) | (Body::Writer { stream: true, .. }, _) => {
                return Err(Errno::ESPIPE)
            }
            (Body::Writer { .. }, Whence::End) => return Err(Errno::EIO),
            (Body::Block { size, .. }, _) => *size,
            (Body::File(content), _) => content.len() as u64,
            (Body::Writer { .. }, _) => 0,
        };
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.position,
            Whence::End => end,
        };
        let target = i64::try_from(base)
            .ok()
            .and_then(|base| base.checked_add(offset))
            .filter(|target| *target >= 0)
            .ok_or(Errno::EINVAL)?;
        file.position = target as u64;
        Ok(file.position)
    }

    fn size(&self, fd: Fd) -> std::result::Result<Option<u64>, Errno> {
        let inner = self.inner.lock();
        let file = inner.files.get(&fd.0).ok_or(Errno::EINVAL)?;
        let device = inner.devices.get(&file.name).ok_or(Errno::ENOENT)?;
        Ok(match &device.body {
            Body::Block { size, .. } => Some(*size),
            Body::File(content) => Some(content.len() as u64),
            _ => None,
        })
    }
}

impl std::fmt::Debug for DeviceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTable")
            .field("config", &self.config)
            .field("devices", &self.names())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;

    use super::*;
    use crate::hooks::settled;

    const RW: OpenFlags = OpenFlags::READ_WRITE;

    fn table() -> Arc<DeviceTable> {
        DeviceTable::new(DeviceConfig::default())
    }

    fn counting_read_hook(calls: &Arc<Mutex<Vec<ReadRequest>>>) -> ReadHook {
        let calls = Arc::clone(calls);
        Arc::new(move |req: ReadRequest| {
            calls.lock().push(req);
            settled()
        })
    }

    #[test]
    fn stream_reader_serves_sent_bytes_then_eof() {
        let t = table();
        t.make_reader("in").expect("reader should be created");
        t.reader_send("in", Some(Bytes::from_static(b"hello")), SendOptions::default())
            .expect("send should work");
        t.reader_send("in", None, SendOptions::default())
            .expect("eof should work");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        let mut buf = [0u8; 3];
        assert_eq!(t.read(fd, &mut buf), Ok(3));
        assert_eq!(&buf, b"hel");
        assert_eq!(t.read(fd, &mut buf), Ok(2));
        assert_eq!(t.read(fd, &mut buf), Ok(0));
    }

    #[test]
    fn empty_stream_reader_calls_hook_once_per_attempt() {
        let t = table();
        let calls = Arc::new(Mutex::new(Vec::new()));
        t.set_read_hook(Some(counting_read_hook(&calls)));
        t.make_reader("in").expect("reader should be created");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        let mut buf = [0u8; 8];
        assert_eq!(t.read(fd, &mut buf), Err(Errno::EAGAIN));
        assert_eq!(t.read(fd, &mut buf), Err(Errno::EAGAIN));
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(calls.lock()[0].length, 8);
        assert!(!t.is_ready("in").expect("reader exists"));
    }

    #[test]
    fn stream_reader_without_hook_is_an_io_error() {
        let t = table();
        t.make_reader("in").expect("reader should be created");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        assert_eq!(t.read(fd, &mut [0u8; 4]), Err(Errno::EIO));
    }

    #[test]
    fn synchronous_hook_feed_is_seen_by_the_same_read() {
        let t = table();
        let weak = Arc::downgrade(&t);
        t.set_read_hook(Some(Arc::new(move |req: ReadRequest| {
            if let Some(t) = weak.upgrade() {
                let _ = t.reader_send(&req.name, Some(Bytes::from_static(b"xy")), SendOptions::default());
            }
            settled()
        })));
        t.make_reader("in").expect("reader should be created");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        let mut buf = [0u8; 4];
        assert_eq!(t.read(fd, &mut buf), Ok(2));
    }

    #[test]
    fn failing_hook_raises_the_host_error() {
        let t = table();
        let raised = HostError::msg("network down");
        let thrown = raised.clone();
        t.set_read_hook(Some(Arc::new(move |_: ReadRequest| {
            futures::future::ready(Err::<(), _>(thrown.clone())).boxed()
        })));
        t.make_reader("in").expect("reader should be created");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        assert_eq!(t.read(fd, &mut [0u8; 4]), Err(Errno::ECANCELED));
        let got = t.take_thrown_error().expect("error should be recorded");
        assert!(HostError::same(&got, &raised));
    }

    #[test]
    fn error_code_is_returned_verbatim() {
        let t = table();
        t.make_reader("in").expect("reader should be created");
        t.reader_send("in", Some(Bytes::from_static(b"x")), SendOptions::error_code(5))
            .expect("send should work");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        assert_eq!(t.read(fd, &mut [0u8; 4]), Err(Errno(5)));
    }

    #[test]
    fn readers_refuse_writing() {
        let t = table();
        t.make_reader("in").expect("reader should be created");
        t.make_block_reader("blk", 10).expect("block reader should be created");
        assert_eq!(t.open("in", RW), Err(Errno::EPERM));
        assert_eq!(t.open("blk", OpenFlags::WRITE_ONLY), Err(Errno::EPERM));
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        assert_eq!(t.write(fd, b"x"), Err(Errno::EIO));
        assert_eq!(t.seek(fd, 0, Whence::Set), Err(Errno::ESPIPE));
    }

    #[test]
    fn block_reader_requests_then_serves_window() {
        let t = table();
        let calls = Arc::new(Mutex::new(Vec::new()));
        t.set_block_read_hook(Some(counting_read_hook(&calls)));
        t.make_block_reader("blk", 100).expect("block reader should be created");
        let fd = t.open("blk", OpenFlags::READ_ONLY).expect("open should work");
        assert_eq!(t.size(fd), Ok(Some(100)));
        let mut buf = [0u8; 10];
        assert_eq!(t.read(fd, &mut buf), Err(Errno::EAGAIN));
        assert_eq!(
            calls.lock().as_slice(),
            &[ReadRequest {
                name: "blk".into(),
                position: 0,
                length: 10
            }]
        );
        t.block_reader_send("blk", 0, Some(Bytes::from((0u8..10).collect::<Vec<_>>())), SendOptions::default())
            .expect("send should work");
        assert_eq!(t.read(fd, &mut buf), Ok(10));
        assert_eq!(buf[9], 9);
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn block_reader_seeks_and_stops_at_size() {
        let t = table();
        t.make_block_reader("blk", 8).expect("block reader should be created");
        let fd = t.open("blk", OpenFlags::READ_ONLY).expect("open should work");
        assert_eq!(t.seek(fd, -2, Whence::End), Ok(6));
        assert_eq!(t.seek(fd, 2, Whence::Cur), Ok(8));
        assert_eq!(t.read(fd, &mut [0u8; 4]), Ok(0));
        assert_eq!(t.seek(fd, -9, Whence::End), Err(Errno::EINVAL));
        assert_eq!(t.seek(fd, 0, Whence::Set), Ok(0));
        // no hook installed
        assert_eq!(t.read(fd, &mut [0u8; 4]), Err(Errno::EIO));
    }

    #[test]
    fn writer_forwards_positioned_bytes() {
        let t = table();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        t.set_write_hook(Some(Arc::new(move |req: WriteRequest| {
            sink.lock().push((req.position, req.data));
            settled()
        })));
        t.make_writer("out").expect("writer should be created");
        assert_eq!(t.open("out", OpenFlags::READ_ONLY), Err(Errno::EPERM));
        let fd = t.open("out", OpenFlags::WRITE_ONLY).expect("open should work");
        assert_eq!(t.write(fd, b"abc"), Ok(3));
        assert_eq!(t.seek(fd, 10, Whence::Set), Ok(10));
        assert_eq!(t.write(fd, b"z"), Ok(1));
        assert_eq!(t.seek(fd, 0, Whence::End), Err(Errno::EIO));
        assert_eq!(t.read(fd, &mut [0u8; 1]), Err(Errno::EIO));
        let seen = seen.lock();
        assert_eq!(seen[0], (0, Bytes::from_static(b"abc")));
        assert_eq!(seen[1], (10, Bytes::from_static(b"z")));
    }

    #[test]
    fn writer_failure_surfaces_on_next_write() {
        let t = table();
        t.set_write_hook(Some(Arc::new(|_: WriteRequest| {
            futures::future::ready(Err::<(), _>(HostError::msg("disk full"))).boxed()
        })));
        t.make_writer("out").expect("writer should be created");
        let fd = t.open("out", OpenFlags::WRITE_ONLY).expect("open should work");
        assert_eq!(t.write(fd, b"abc"), Ok(3));
        assert_eq!(t.write(fd, b"def"), Err(Errno::ECANCELED));
        assert_eq!(
            t.take_thrown_error().map(|e| e.to_string()).as_deref(),
            Some("disk full")
        );
    }

    #[test]
    fn stream_writer_rejects_out_of_order_positions() {
        let t = table();
        t.set_write_hook(Some(Arc::new(|_: WriteRequest| settled())));
        t.make_stream_writer("pipe").expect("stream writer should be created");
        let a = t.open("pipe", OpenFlags::WRITE_ONLY).expect("open should work");
        let b = t.open("pipe", OpenFlags::WRITE_ONLY).expect("open should work");
        assert_eq!(t.write(a, b"1234"), Ok(4));
        assert_eq!(t.write(b, b"5"), Err(Errno::ESPIPE));
        assert_eq!(t.seek(a, 0, Whence::Cur), Err(Errno::ESPIPE));
        assert_eq!(t.write(a, b"5"), Ok(1));
    }

    #[test]
    fn unlink_twice_reports_missing_device() {
        let t = table();
        t.make_reader("in").expect("reader should be created");
        t.unlink("in").expect("first unlink should work");
        assert!(matches!(t.unlink("in"), Err(DeviceError::NotRegistered(_))));
        assert!(t.kind("in").is_none());
    }

    #[test]
    fn unlink_cancels_waiters() {
        let t = table();
        t.make_reader("in").expect("reader should be created");
        let wait = t.wait_ready("in").expect("wait should register");
        t.unlink("in").expect("unlink should work");
        assert!(wait.blocking_wait().is_err());
    }

    #[test]
    fn send_wakes_waiters_and_marks_ready() {
        let t = table();
        t.make_block_reader("blk", 4).expect("block reader should be created");
        let first = t.wait_ready("blk").expect("wait should register");
        assert!(t.is_waiting(Some("blk")));
        t.block_reader_send("blk", 0, Some(Bytes::from_static(b"abcd")), SendOptions::default())
            .expect("send should work");
        assert!(first.blocking_wait().is_ok());
        assert!(!t.is_waiting(None));
        assert!(t.wait_ready("blk").expect("ready").blocking_wait().is_ok());
    }

    #[test]
    fn mounted_prefix_creates_writers() {
        let t = table();
        t.set_write_hook(Some(Arc::new(|_: WriteRequest| settled())));
        t.mount_writer_fs("/out").expect("mount should work");
        assert!(matches!(t.mount_writer_fs("/out/"), Err(DeviceError::AlreadyMounted(_))));
        let create = OpenFlags::WRITE_ONLY | OpenFlags::CREATE | OpenFlags::TRUNCATE;
        t.open("/out/a.avbr", create).expect("open should create");
        assert_eq!(t.kind("/out/a.avbr"), Some(DeviceKind::Writer));
        t.open("/tmp/b", create).expect("open should create");
        assert_eq!(t.kind("/tmp/b"), Some(DeviceKind::MemFile));
        t.unmount_writer_fs("/out").expect("unmount should work");
        assert!(t.kind("/out/a.avbr").is_none());
        assert!(matches!(t.unmount_writer_fs("/out"), Err(DeviceError::NotMounted(_))));
    }

    #[test]
    fn memory_files_round_trip_through_traps() {
        let t = table();
        let fd = t
            .open("/tmp/x", OpenFlags::WRITE_ONLY | OpenFlags::CREATE)
            .expect("open should create");
        assert_eq!(t.write(fd, b"hello"), Ok(5));
        t.close(fd).expect("close should work");
        assert_eq!(&t.read_file("/tmp/x").expect("file exists")[..], b"hello");
        assert_eq!(t.open("/nope", OpenFlags::READ_ONLY), Err(Errno::ENOENT));

        let path = t.make_workerfs_file("in.avbr", b"data").expect("file should mount");
        assert_eq!(path, "/in.avbr.d/in.avbr");
        let fd = t.open(&path, OpenFlags::READ_ONLY).expect("open should work");
        let mut buf = [0u8; 8];
        assert_eq!(t.read(fd, &mut buf), Ok(4));
        t.unlink_workerfs_file("in.avbr").expect("unlink should work");
    }

    #[test]
    fn blocking_reads_park_until_sent() {
        let t = DeviceTable::new(DeviceConfig {
            blocking_reads: true,
            ..DeviceConfig::default()
        });
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);
        t.set_read_hook(Some(Arc::new(move |_: ReadRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            settled()
        })));
        t.make_reader("in").expect("reader should be created");
        let fd = t.open("in", OpenFlags::READ_ONLY).expect("open should work");
        let reader = {
            let t = Arc::clone(&t);
            std::thread::spawn(move || {
                let mut buf = [0u8; 4];
                t.read(fd, &mut buf).map(|n| buf[..n].to_vec())
            })
        };
        while !t.is_waiting(Some("in")) {
            std::thread::yield_now();
        }
        t.reader_send("in", Some(Bytes::from_static(b"ok")), SendOptions::default())
            .expect("send should work");
        let got = reader.join().expect("reader thread should finish");
        assert_eq!(got, Ok(b"ok".to_vec()));
        assert!(requests.load(Ordering::SeqCst) >= 1);
    }
}
