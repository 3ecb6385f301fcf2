//! Message protocol between a host and an engine running in another
//! context.
//!
//! Calls carry a numeric id that the reply echoes; host-bound
//! notifications carry one of a few reserved string ids instead
//! ([`EventKind`]). On a byte stream every envelope is framed with:
//! - A 2-byte magic number ("AV") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian channel ID
//!
//! Bulk buffers travel out of band on the BUFFER channel.

pub mod channel;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod link;
pub mod pending;
pub mod reader;
pub mod wire;
pub mod writer;

pub use channel::{channel_name, BUFFER, CALL, CONTROL, EVENT, REPLY};
pub use codec::{decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use envelope::{
    CallEnvelope, ErrorPayload, EventEnvelope, EventKind, Message, MessageId, ReplyEnvelope,
};
pub use error::{FrameError, ProtocolError, Result};
#[cfg(unix)]
pub use link::socket_pair;
pub use link::{memory_pair, stream_link, Link, LinkReceiver, LinkSender};
pub use pending::PendingTable;
pub use reader::FrameReader;
pub use wire::{encode, WireDecoder};
pub use writer::FrameWriter;
