//! Interface to a compiled, non-reentrant media engine.
//!
//! The engine is an external collaborator. This crate only names what the
//! bridge consumes from it and what it must provide back:
//!
//! - [`Engine`]: the raw primitive surface (allocate/free, per-field get/set,
//!   bulk plane access, codec/format/filter primitives). Every call returns
//!   the engine's raw status code; nothing here is translated.
//! - [`Vfs`]: the virtual filesystem trap surface the engine calls into
//!   mid-operation. The bridge's device table implements it.
//! - [`EngineFactory`]: how a bridge instance obtains an engine.

pub mod codes;
pub mod engine;
pub mod error;
pub mod field;
pub mod media;
pub mod vfs;

pub use engine::{
    Capabilities, Engine, EngineFactory, EngineOptions, FilterGraph, FilterPad, Handle, Variant,
};
pub use error::{EngineError, Result};
pub use field::{Field, Owner};
pub use media::{
    channel_layout_for, channels_for, f64_to_i64, i64_to_f64, rescale, MediaType, PixFmtDescriptor,
    PixelFormat, Rational, SampleFormat,
};
pub use vfs::{Errno, Fd, OpenFlags, Vfs, Whence};
