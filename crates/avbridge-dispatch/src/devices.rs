//! Device functions: calls answered by the device table.
//!
//! These never enter the engine. Waits and handle-writer unlinks come back
//! pending so the caller's context keeps running while they settle.

use std::path::PathBuf;
use std::sync::Arc;

use avbridge_device::{create_file, DeviceError, DeviceTable, HostError, ReadaheadSource, SendOptions};
use avbridge_marshal::{Buffer, Value};
use bytes::Bytes;
use futures::FutureExt;

use crate::args::{opt_int, opt_str, Args};
use crate::context::Outcome;
use crate::error::{BridgeError, Result};
use crate::function::Builtin;

pub(crate) fn call(devices: &Arc<DeviceTable>, builtin: Builtin, args: Vec<Value>) -> Result<Outcome> {
    use Builtin::*;

    let mut args = Args::new(builtin.name(), args);
    let done = |r: avbridge_device::Result<()>| r.map(|()| Outcome::Ready(Value::Null)).map_err(Into::into);
    match builtin {
        MkReaderDev => {
            let name = args.string()?;
            done(devices.make_reader(&name))
        }
        MkBlockReaderDev => {
            let name = args.string()?;
            let size = args.int()?.max(0) as u64;
            done(devices.make_block_reader(&name, size))
        }
        MkWriterDev => {
            let name = args.string()?;
            done(devices.make_writer(&name))
        }
        MkStreamWriterDev => {
            let name = args.string()?;
            done(devices.make_stream_writer(&name))
        }
        MountWriterFs => {
            let prefix = args.string()?;
            done(devices.mount_writer_fs(&prefix))
        }
        UnmountWriterFs => {
            let prefix = args.string()?;
            done(devices.unmount_writer_fs(&prefix))
        }
        MkReadaheadFile => {
            let name = args.string()?;
            let source = match args.next() {
                Value::Buffer(buffer) => ReadaheadSource::Memory(buffer.into_bytes()),
                Value::Str(path) => ReadaheadSource::File(PathBuf::from(path)),
                other => {
                    return Err(args.bad(format_args!("expected buffer or path, found {}", other.kind())))
                }
            };
            done(devices.make_readahead(&name, source))
        }
        UnlinkReadaheadFile => {
            let name = args.string()?;
            done(devices.unlink_readahead(&name))
        }
        MkFsfhFile => {
            let name = args.string()?;
            let path = args.string()?;
            done(devices.make_handle_writer(&name, create_file(path)))
        }
        UnlinkFsfhFile => {
            let name = args.string()?;
            let devices = Arc::clone(devices);
            Ok(Outcome::Pending(
                async move {
                    devices.unlink_handle_writer(&name).await?;
                    Ok(Value::Null)
                }
                .boxed(),
            ))
        }
        MkWorkerfsFile => {
            let name = args.string()?;
            let data = buffer_arg(&mut args)?;
            let path = devices.make_workerfs_file(&name, &data)?;
            Ok(Outcome::Ready(Value::Str(path)))
        }
        UnlinkWorkerfsFile => {
            let name = args.string()?;
            done(devices.unlink_workerfs_file(&name))
        }
        Unlink => {
            let name = args.string()?;
            done(devices.unlink(&name))
        }
        ReadFile => {
            let name = args.string()?;
            let data = devices.read_file(&name)?;
            Ok(Outcome::Ready(Value::Buffer(Buffer::fresh(data))))
        }
        WriteFile => {
            let name = args.string()?;
            let data = buffer_arg(&mut args)?;
            done(devices.write_file(&name, &data))
        }
        ReaderDevSend => {
            let name = args.string()?;
            let data = opt_buffer_arg(&mut args)?;
            let options = send_options(&args.next());
            done(devices.reader_send(&name, data, options))
        }
        BlockReaderDevSend => {
            let name = args.string()?;
            let position = args.int()?.max(0) as u64;
            let data = opt_buffer_arg(&mut args)?;
            let options = send_options(&args.next());
            done(devices.block_reader_send(&name, position, data, options))
        }
        ReaderDevReady => {
            let name = args.string()?;
            Ok(Outcome::Ready(Value::Bool(devices.is_ready(&name)?)))
        }
        ReaderDevWait => {
            let name = args.string()?;
            let wait = devices.wait_ready(&name)?;
            Ok(Outcome::Pending(
                async move {
                    match wait.await {
                        Ok(()) => Ok(Value::Null),
                        Err(_) => Err(DeviceError::Cancelled(name).into()),
                    }
                }
                .boxed(),
            ))
        }
        ReaderDevWaiting => {
            let name = args.opt_string()?;
            Ok(Outcome::Ready(Value::Bool(devices.is_waiting(name.as_deref()))))
        }

        other => Err(BridgeError::UnknownFunction(other.name().to_string())),
    }
}

fn buffer_arg(args: &mut Args) -> Result<Bytes> {
    match args.next() {
        Value::Buffer(buffer) => Ok(buffer.into_bytes()),
        Value::Str(text) => Ok(Bytes::from(text.into_bytes())),
        other => Err(args.bad(format_args!("expected buffer, found {}", other.kind()))),
    }
}

/// A buffer, or null for end of stream.
fn opt_buffer_arg(args: &mut Args) -> Result<Option<Bytes>> {
    match args.next() {
        Value::Null => Ok(None),
        Value::Buffer(buffer) => Ok(Some(buffer.into_bytes())),
        other => Err(args.bad(format_args!("expected buffer or null, found {}", other.kind()))),
    }
}

/// `{error_code, error}`. An error arrives as its message.
fn send_options(options: &Value) -> SendOptions {
    SendOptions {
        error_code: opt_int(options, "error_code").map(|code| code as i32),
        error: opt_str(options, "error").map(HostError::msg),
    }
}

#[cfg(test)]
mod tests {
    use avbridge_device::DeviceConfig;

    use super::*;

    fn ready(outcome: Result<Outcome>) -> Value {
        match outcome.expect("device call should succeed") {
            Outcome::Ready(value) => value,
            Outcome::Pending(_) => panic!("expected a ready outcome"),
        }
    }

    fn run(devices: &Arc<DeviceTable>, builtin: Builtin, args: Vec<Value>) -> Result<Outcome> {
        call(devices, builtin, args)
    }

    #[tokio::test]
    async fn wait_resolves_on_send() {
        let devices = DeviceTable::new(DeviceConfig::default());
        ready(run(&devices, Builtin::MkReaderDev, vec!["in".into()]));

        let Outcome::Pending(wait) = run(&devices, Builtin::ReaderDevWait, vec!["in".into()]).unwrap()
        else {
            panic!("wait should be pending");
        };
        let waiting = ready(run(&devices, Builtin::ReaderDevWaiting, vec!["in".into()]));
        assert_eq!(waiting, Value::Bool(true));

        ready(run(
            &devices,
            Builtin::ReaderDevSend,
            vec!["in".into(), Buffer::copy_from_slice(b"abc").into()],
        ));
        assert_eq!(wait.await.unwrap(), Value::Null);
        assert_eq!(
            ready(run(&devices, Builtin::ReaderDevWaiting, vec![])),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn unlink_cancels_waiters() {
        let devices = DeviceTable::new(DeviceConfig::default());
        ready(run(&devices, Builtin::MkReaderDev, vec!["in".into()]));
        let Outcome::Pending(wait) = run(&devices, Builtin::ReaderDevWait, vec!["in".into()]).unwrap()
        else {
            panic!("wait should be pending");
        };
        ready(run(&devices, Builtin::Unlink, vec!["in".into()]));
        assert!(matches!(
            wait.await,
            Err(crate::BridgeError::Device(DeviceError::Cancelled(name))) if name == "in"
        ));
        assert!(matches!(
            run(&devices, Builtin::Unlink, vec!["in".into()]),
            Err(crate::BridgeError::Device(DeviceError::NotRegistered(_)))
        ));
    }

    #[test]
    fn files_round_trip() {
        let devices = DeviceTable::new(DeviceConfig::default());
        ready(run(
            &devices,
            Builtin::WriteFile,
            vec!["notes.txt".into(), Buffer::copy_from_slice(b"hello").into()],
        ));
        let Value::Buffer(read) = ready(run(&devices, Builtin::ReadFile, vec!["notes.txt".into()])) else {
            panic!("readFile should return a buffer");
        };
        assert_eq!(read.as_slice(), b"hello");

        let path = ready(run(
            &devices,
            Builtin::MkWorkerfsFile,
            vec!["blob".into(), Buffer::copy_from_slice(b"xyz").into()],
        ));
        assert_eq!(path, Value::from("/blob.d/blob"));
        ready(run(&devices, Builtin::UnlinkWorkerfsFile, vec!["blob".into()]));
    }

    #[test]
    fn send_options_carry_error_message() {
        let options = send_options(&Value::map([
            ("error", Value::from("network down")),
            ("error_code", Value::Int(5)),
        ]));
        assert_eq!(options.error_code, Some(5));
        assert_eq!(options.error.map(|e| e.to_string()).as_deref(), Some("network down"));
    }

    #[test]
    fn bad_source_is_rejected() {
        let devices = DeviceTable::new(DeviceConfig::default());
        assert!(matches!(
            run(&devices, Builtin::MkReadaheadFile, vec!["r".into(), Value::Int(3)]),
            Err(crate::BridgeError::BadArgument { index: 1, .. })
        ));
    }
}
