//! Virtual file devices for a media engine's filesystem traps.
//!
//! The engine performs I/O synchronously through [`Vfs`](avbridge_engine::Vfs).
//! A [`DeviceTable`] answers those traps from host-fed buffers: a trap that
//! finds no data fires a host hook, marks the device not ready and answers
//! `EAGAIN`. The host later feeds the device with [`DeviceTable::reader_send`]
//! or [`DeviceTable::block_reader_send`], which wakes every waiter
//! registered on it in the [`WaiterRegistry`].

pub mod config;
pub mod error;
pub mod handle_writer;
pub mod hooks;
pub mod readahead;
pub mod table;
pub mod waiters;

pub use config::{DeviceConfig, DEFAULT_BLOCK_SIZE};
pub use error::{DeviceError, HostError, Result};
pub use handle_writer::{create_file, HostFile, HostFileOpener};
pub use hooks::{settled, HookFuture, Hooks, ReadHook, ReadRequest, WriteHook, WriteRequest};
pub use readahead::{BlockSource, FileSource, ReadaheadSource};
pub use table::{DeviceKind, DeviceTable, SendOptions};
pub use waiters::{Cancelled, WaitHandle, WaiterRegistry, WakeOutcome};
