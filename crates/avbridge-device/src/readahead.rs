//! Read-ahead block devices.
//!
//! A read-ahead device is a block reader whose block-read hook is served
//! from a host-side source. Each request fetches at least one block; once
//! delivered, the following block is fetched in the background. A block
//! that is already in flight is shared by every request for it.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::HostError;
use crate::hooks::{Driver, HookFuture};
use crate::table::{DeviceTable, SendOptions};

/// Random-access byte source behind a read-ahead device.
pub trait BlockSource: Send + Sync {
    fn size(&self) -> u64;

    /// Fetch up to `length` bytes at `position`.
    fn fetch(&self, position: u64, length: usize) -> BoxFuture<'static, Result<Bytes, HostError>>;
}

impl BlockSource for Bytes {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn fetch(&self, position: u64, length: usize) -> BoxFuture<'static, Result<Bytes, HostError>> {
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(length).min(self.len());
        futures::future::ready(Ok(self.slice(start..end))).boxed()
    }
}

/// A host file read through tokio. Fetches must run on a tokio runtime.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self { path, size })
    }
}

impl BlockSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn fetch(&self, position: u64, length: usize) -> BoxFuture<'static, Result<Bytes, HostError>> {
        let path = self.path.clone();
        async move {
            let mut file = tokio::fs::File::open(&path).await?;
            file.seek(std::io::SeekFrom::Start(position)).await?;
            let mut buf = Vec::with_capacity(length);
            file.take(length as u64).read_to_end(&mut buf).await?;
            Ok::<_, HostError>(Bytes::from(buf))
        }
        .boxed()
    }
}

/// What a read-ahead device reads from.
#[derive(Clone)]
pub enum ReadaheadSource {
    Memory(Bytes),
    File(PathBuf),
    Custom(Arc<dyn BlockSource>),
}

impl ReadaheadSource {
    pub(crate) fn into_source(self) -> std::io::Result<Arc<dyn BlockSource>> {
        Ok(match self {
            ReadaheadSource::Memory(bytes) => Arc::new(bytes),
            ReadaheadSource::File(path) => Arc::new(FileSource::open(path)?),
            ReadaheadSource::Custom(source) => source,
        })
    }
}

impl std::fmt::Debug for ReadaheadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadaheadSource::Memory(bytes) => write!(f, "Memory({} bytes)", bytes.len()),
            ReadaheadSource::File(path) => write!(f, "File({})", path.display()),
            ReadaheadSource::Custom(source) => write!(f, "Custom({} bytes)", source.size()),
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Bytes, HostError>>>;

struct Inflight {
    position: u64,
    fetch: SharedFetch,
}

pub(crate) struct Readahead {
    source: Arc<dyn BlockSource>,
    block_size: usize,
    current: Mutex<Option<Inflight>>,
}

impl Readahead {
    pub(crate) fn new(source: Arc<dyn BlockSource>, block_size: usize) -> Self {
        Self {
            source,
            block_size: block_size.max(1),
            current: Mutex::new(None),
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.source.size()
    }

    fn fetch_at(&self, position: u64, length: usize) -> SharedFetch {
        let mut current = self.current.lock();
        if let Some(inflight) = current.as_ref().filter(|f| f.position == position) {
            return inflight.fetch.clone();
        }
        let remaining = self.size().saturating_sub(position);
        let length = length
            .max(self.block_size)
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));
        tracing::trace!(position, length, "read-ahead fetch");
        let fetch = self.source.fetch(position, length).shared();
        *current = Some(Inflight {
            position,
            fetch: fetch.clone(),
        });
        fetch
    }

    fn forget(&self, position: u64) {
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|f| f.position == position) {
            *current = None;
        }
    }

    /// Serve a block-read request for `name`.
    pub(crate) fn request(
        self: &Arc<Self>,
        table: Weak<DeviceTable>,
        driver: Driver,
        name: String,
        position: u64,
        length: usize,
    ) -> HookFuture {
        let fetch = self.fetch_at(position, length);
        let this = Arc::clone(self);
        async move {
            let data = match fetch.await {
                Ok(data) => data,
                Err(error) => {
                    this.forget(position);
                    return Err(error);
                }
            };
            let next = position + data.len() as u64;
            let Some(table) = table.upgrade() else {
                return Ok(());
            };
            if let Err(error) =
                table.block_reader_send(&name, position, Some(data), SendOptions::default())
            {
                tracing::trace!(device = %name, %error, "read-ahead device gone");
                return Ok(());
            }
            if next < this.size() {
                let prefetch = this.fetch_at(next, length);
                driver.spawn(prefetch.map(|_| ()));
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_clamps_to_its_length() {
        let source = Bytes::from_static(b"0123456789");
        let chunk = futures::executor::block_on(source.fetch(8, 16)).expect("fetch should work");
        assert_eq!(&chunk[..], b"89");
        let past = futures::executor::block_on(source.fetch(20, 4)).expect("fetch should work");
        assert!(past.is_empty());
    }

    #[test]
    fn inflight_block_is_shared() {
        let ra = Readahead::new(Arc::new(Bytes::from(vec![7u8; 64])), 16);
        let a = ra.fetch_at(0, 4);
        let b = ra.fetch_at(0, 8);
        assert!(a.ptr_eq(&b));
        let c = ra.fetch_at(16, 4);
        assert!(!a.ptr_eq(&c));
        let data = futures::executor::block_on(c).expect("fetch should work");
        assert_eq!(data.len(), 16);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = ReadaheadSource::File(PathBuf::from("/nonexistent/avbridge/input"))
            .into_source()
            .err()
            .expect("missing file should fail");
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
