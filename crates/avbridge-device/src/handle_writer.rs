//! Writer devices backed by a host file handle.
//!
//! Writes are forwarded to a single task per device that applies them in
//! submission order. The host file is opened on the first write and closed
//! when the device is unlinked.

use std::io;
use std::path::PathBuf;
use std::sync::Weak;

use bytes::Bytes;
use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::HostError;
use crate::hooks::Driver;
use crate::table::DeviceTable;

/// A host resource that accepts positioned writes.
pub trait HostFile: Send {
    fn write_at(&mut self, position: u64, data: Bytes) -> BoxFuture<'_, io::Result<()>>;

    fn close(self: Box<Self>) -> BoxFuture<'static, io::Result<()>>;
}

impl HostFile for tokio::fs::File {
    fn write_at(&mut self, position: u64, data: Bytes) -> BoxFuture<'_, io::Result<()>> {
        async move {
            self.seek(io::SeekFrom::Start(position)).await?;
            self.write_all(&data).await
        }
        .boxed()
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, io::Result<()>> {
        async move {
            self.flush().await?;
            self.sync_all().await
        }
        .boxed()
    }
}

/// Opens the host resource behind a handle writer.
pub type HostFileOpener =
    Box<dyn FnOnce() -> BoxFuture<'static, io::Result<Box<dyn HostFile>>> + Send>;

/// Opener that creates (or truncates) a file on the host filesystem.
pub fn create_file(path: impl Into<PathBuf>) -> HostFileOpener {
    let path = path.into();
    Box::new(move || {
        async move {
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
                .await?;
            Ok::<_, io::Error>(Box::new(file) as Box<dyn HostFile>)
        }
        .boxed()
    })
}

pub(crate) enum Op {
    Write { position: u64, data: Bytes },
    Close(oneshot::Sender<io::Result<()>>),
}

pub(crate) type OpSender = mpsc::UnboundedSender<Op>;

pub(crate) fn start(
    name: String,
    opener: HostFileOpener,
    table: Weak<DeviceTable>,
    driver: &Driver,
) -> OpSender {
    let (tx, rx) = mpsc::unbounded_channel();
    driver.spawn(run(name, opener, rx, table));
    tx
}

async fn run(
    name: String,
    opener: HostFileOpener,
    mut rx: mpsc::UnboundedReceiver<Op>,
    table: Weak<DeviceTable>,
) {
    let mut opener = Some(opener);
    let mut file: Option<Box<dyn HostFile>> = None;
    let mut failed = false;

    while let Some(op) = rx.recv().await {
        match op {
            Op::Write { position, data } => {
                if failed {
                    continue;
                }
                if let Err(error) = write(&mut file, &mut opener, position, data).await {
                    failed = true;
                    tracing::warn!(device = %name, %error, "handle writer failed");
                    if let Some(table) = table.upgrade() {
                        table.fail_writer(&name, HostError::from(error));
                    }
                }
            }
            Op::Close(done) => {
                let _ = done.send(close(file.take()).await);
                return;
            }
        }
    }

    if let Err(error) = close(file.take()).await {
        tracing::warn!(device = %name, %error, "closing host file failed");
    }
}

async fn write(
    file: &mut Option<Box<dyn HostFile>>,
    opener: &mut Option<HostFileOpener>,
    position: u64,
    data: Bytes,
) -> io::Result<()> {
    if file.is_none() {
        let open = opener
            .take()
            .ok_or_else(|| io::Error::other("host file already failed to open"))?;
        *file = Some(open().await?);
    }
    match file.as_mut() {
        Some(file) => file.write_at(position, data).await,
        None => Ok(()),
    }
}

async fn close(file: Option<Box<dyn HostFile>>) -> io::Result<()> {
    match file {
        Some(file) => file.close().await,
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    struct Recorder(Arc<Mutex<Vec<(u64, Vec<u8>)>>>);

    impl HostFile for Recorder {
        fn write_at(&mut self, position: u64, data: Bytes) -> BoxFuture<'_, io::Result<()>> {
            self.0.lock().push((position, data.to_vec()));
            futures::future::ready(Ok(())).boxed()
        }

        fn close(self: Box<Self>) -> BoxFuture<'static, io::Result<()>> {
            futures::future::ready(Ok(())).boxed()
        }
    }

    #[tokio::test]
    async fn writes_apply_in_submission_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let opener: HostFileOpener = Box::new(move || {
            async move { Ok::<_, io::Error>(Box::new(Recorder(sink)) as Box<dyn HostFile>) }.boxed()
        });
        let tx = start("out".into(), opener, Weak::new(), &Driver::capture());
        for (i, chunk) in [&b"ab"[..], b"cd", b"ef"].iter().enumerate() {
            let _ = tx.send(Op::Write {
                position: i as u64 * 2,
                data: Bytes::copy_from_slice(chunk),
            });
        }
        let (done_tx, done_rx) = oneshot::channel();
        let _ = tx.send(Op::Close(done_tx));
        done_rx
            .await
            .expect("task should acknowledge close")
            .expect("close should succeed");
        let positions: Vec<u64> = log.lock().iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![0, 2, 4]);
    }
}
