use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use avbridge_device::{
    create_file, BlockSource, DeviceConfig, DeviceTable, HostError, Hooks, ReadRequest,
    ReadaheadSource, SendOptions,
};
use avbridge_engine::{Errno, OpenFlags, Vfs};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

fn temp_path(tag: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("avbridge-device-{tag}-{}", std::process::id()))
}

#[tokio::test]
async fn block_read_round_trip_with_async_host() {
    let table = DeviceTable::new(DeviceConfig::default());
    let weak = Arc::downgrade(&table);
    table.set_hooks(Hooks::default().on_block_read(move |req: ReadRequest| {
        let weak = weak.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let data: Vec<u8> = (0..req.length as u64).map(|i| (req.position + i) as u8).collect();
            if let Some(table) = weak.upgrade() {
                table
                    .block_reader_send(&req.name, req.position, Some(Bytes::from(data)), SendOptions::default())
                    .map_err(HostError::new)?;
            }
            Ok::<(), HostError>(())
        }
    }));
    table.make_block_reader("blk", 100).expect("block reader should be created");
    let fd = table.open("blk", OpenFlags::READ_ONLY).expect("open should work");

    let mut buf = [0u8; 10];
    assert_eq!(table.read(fd, &mut buf), Err(Errno::EAGAIN));
    table
        .wait_ready("blk")
        .expect("device should exist")
        .await
        .expect("wait should resolve");
    assert_eq!(table.read(fd, &mut buf), Ok(10));
    assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

#[tokio::test]
async fn rejected_hook_is_raised_on_the_retry() {
    let table = DeviceTable::new(DeviceConfig::default());
    table.set_hooks(Hooks::default().on_read(|_req: ReadRequest| async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Err::<(), _>(HostError::msg("upstream closed"))
    }));
    table.make_reader("in").expect("reader should be created");
    let fd = table.open("in", OpenFlags::READ_ONLY).expect("open should work");
    assert_eq!(table.read(fd, &mut [0u8; 4]), Err(Errno::EAGAIN));
    table
        .wait_ready("in")
        .expect("device should exist")
        .await
        .expect("wait should resolve");
    assert_eq!(table.read(fd, &mut [0u8; 4]), Err(Errno::ECANCELED));
    let error = table.take_thrown_error().expect("host error should be recorded");
    assert_eq!(error.to_string(), "upstream closed");
}

struct CountingSource {
    data: Bytes,
    fetches: AtomicUsize,
}

impl BlockSource for CountingSource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn fetch(&self, position: u64, length: usize) -> BoxFuture<'static, Result<Bytes, HostError>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let start = position as usize;
        let chunk = self.data.slice(start..(start + length).min(self.data.len()));
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(chunk)
        }
        .boxed()
    }
}

#[tokio::test]
async fn readahead_shares_the_inflight_block() {
    let source = Arc::new(CountingSource {
        data: Bytes::from((0..=255u8).cycle().take(64).collect::<Vec<u8>>()),
        fetches: AtomicUsize::new(0),
    });
    let table = DeviceTable::new(DeviceConfig {
        block_size: 16,
        ..DeviceConfig::default()
    });
    table
        .make_readahead("ra", ReadaheadSource::Custom(source.clone()))
        .expect("read-ahead device should be created");
    let a = table.open("ra", OpenFlags::READ_ONLY).expect("open should work");
    let b = table.open("ra", OpenFlags::READ_ONLY).expect("open should work");

    let mut buf = [0u8; 8];
    assert_eq!(table.read(a, &mut buf), Err(Errno::EAGAIN));
    assert_eq!(table.read(b, &mut buf), Err(Errno::EAGAIN));
    table
        .wait_ready("ra")
        .expect("device should exist")
        .await
        .expect("wait should resolve");
    assert_eq!(table.read(a, &mut buf), Ok(8));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2, "one fetch plus one prefetch");

    assert_eq!(table.read(a, &mut buf), Ok(8));
    assert_eq!(table.read(a, &mut buf), Err(Errno::EAGAIN));
    table
        .wait_ready("ra")
        .expect("device should exist")
        .await
        .expect("wait should resolve");
    assert_eq!(table.read(a, &mut buf), Ok(8));
    assert_eq!(buf[0], 16);
    table.unlink_readahead("ra").expect("unlink should work");
}

#[tokio::test]
async fn readahead_from_host_file() {
    let path = temp_path("ra");
    tokio::fs::write(&path, b"0123456789abcdef")
        .await
        .expect("fixture should be written");
    let table = DeviceTable::new(DeviceConfig::default());
    table
        .make_readahead("file", ReadaheadSource::File(path.clone()))
        .expect("read-ahead device should be created");
    let fd = table.open("file", OpenFlags::READ_ONLY).expect("open should work");
    assert_eq!(table.size(fd), Ok(Some(16)));

    let mut out = Vec::new();
    let mut buf = [0u8; 6];
    loop {
        match table.read(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(Errno::EAGAIN) => {
                table
                    .wait_ready("file")
                    .expect("device should exist")
                    .await
                    .expect("wait should resolve");
            }
            Err(e) => panic!("unexpected errno {e:?}"),
        }
    }
    assert_eq!(out, b"0123456789abcdef");
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn handle_writer_applies_writes_in_order() {
    let path = temp_path("fsfh");
    let table = DeviceTable::new(DeviceConfig::default());
    table
        .make_handle_writer("out", create_file(&path))
        .expect("handle writer should be created");
    let fd = table.open("out", OpenFlags::WRITE_ONLY).expect("open should work");
    assert_eq!(table.write(fd, b"hello "), Ok(6));
    assert_eq!(table.write(fd, b"world"), Ok(5));
    table
        .unlink_handle_writer("out")
        .await
        .expect("close should succeed");
    let written = tokio::fs::read(&path).await.expect("file should exist");
    assert_eq!(written, b"hello world");
    assert!(table.kind("out").is_none());
    let _ = tokio::fs::remove_file(&path).await;
}
