//! Async bridge to a non-reentrant media engine.
//!
//! avbridge runs a synchronous, single-threaded media engine behind one
//! async call surface. The engine reads and writes through virtual devices
//! the host feeds on demand, media objects cross the boundary as owned
//! records, and the engine can live in the caller's context, on a thread
//! behind a message link, or on a worker pool of its own.
//!
//! # Crate Structure
//!
//! - [`engine`]: the engine interface (primitives, fields, codes, traps)
//! - [`marshal`]: host records and copy-in/copy-out
//! - [`device`]: virtual devices and the waiter registry
//! - [`protocol`]: envelopes, the pending-call table and links
//! - [`dispatch`]: topology selection, the call serializer and [`Bridge`]
//! - [`soft`]: an in-memory reference engine (behind the `soft` feature)

/// Re-export engine interface types.
pub mod engine {
    pub use avbridge_engine::*;
}

/// Re-export marshaling types.
pub mod marshal {
    pub use avbridge_marshal::*;
}

/// Re-export device types.
pub mod device {
    pub use avbridge_device::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use avbridge_protocol::*;
}

/// Re-export dispatcher types.
pub mod dispatch {
    pub use avbridge_dispatch::*;
}

/// Re-export the reference engine (requires `soft` feature).
#[cfg(feature = "soft")]
pub mod soft {
    pub use avbridge_soft::*;
}

pub use avbridge_dispatch::{Bridge, BridgeConfig, BridgeError, Builtin, Function, LinkKind, Mode};
