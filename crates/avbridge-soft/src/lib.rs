//! A small in-memory media engine.
//!
//! Implements the [`avbridge_engine::Engine`] surface with trivial media
//! algorithms: PCM and raw video codecs, the `avbr` container, passthrough
//! filters and a passthrough bitstream filter. All container I/O goes through
//! the [`avbridge_engine::Vfs`] traps it is created with, so it behaves like
//! the real engine toward devices: a trap answering `EAGAIN` surfaces as a
//! retry code and the operation can be re-invoked later without losing data.

mod codec;
mod container;
mod engine;
mod factory;
mod filter;
mod objects;

pub use container::FORMAT_NAME;
pub use engine::{EmptyFs, SoftEngine};
pub use factory::SoftFactory;
