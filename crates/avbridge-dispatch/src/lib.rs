//! One async call surface over a non-reentrant media engine.
//!
//! [`Bridge::create`] picks a topology with [`select_mode`]:
//! - **direct**: the engine runs in the caller's context and calls execute
//!   inline; synchronous calls are available.
//! - **channel**: the engine runs on its own thread behind a message link
//!   (in-memory or a Unix socket pair); device hooks arrive as events.
//! - **thread-pool**: the engine owns worker threads and takes commands on
//!   one of them; the device table stays on the host side and a read that
//!   runs dry parks the command thread until the host feeds the device.
//!
//! Every function is addressed through the closed [`Function`] registry.
//! Metafunctions (multi-step engine workflows) run through a per-bridge
//! [`Serializer`]; primitives and device functions do not.

mod args;
mod bridge;
mod channel;
pub mod config;
pub mod context;
mod devices;
mod direct;
pub mod error;
pub mod function;
mod meta;
pub mod mode;
mod primitive;
mod remote;
pub mod serializer;
mod threadpool;

pub use bridge::{Bridge, Caller, ReadBatch};
pub use config::{BridgeConfig, LinkKind};
pub use context::{invoke, EngineContext, Outcome};
pub use error::{BridgeError, Result};
pub use function::{Builtin, Function, FunctionKind};
pub use mode::{select_mode, Mode};
pub use serializer::Serializer;
