//! Call, reply and event envelopes.

use std::fmt;

use avbridge_marshal::{Buffer, Value};
use serde::{Deserialize, Serialize};

/// Reserved string ids for messages that are not replies to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The engine context finished loading.
    Ready,
    /// A stream reader needs data: `[name, position, length]`.
    Read,
    /// A block reader needs data: `[name, position, length]`.
    BlockRead,
    /// A writer produced data: `[name, position, bytes]`.
    Write,
    /// The engine context failed to load.
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Ready,
        EventKind::Read,
        EventKind::BlockRead,
        EventKind::Write,
        EventKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ready => "onready",
            EventKind::Read => "onread",
            EventKind::BlockRead => "onblockread",
            EventKind::Write => "onwrite",
            EventKind::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Correlation id of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Call(u64),
    Event(EventKind),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Call(id) => write!(f, "{id}"),
            MessageId::Event(kind) => f.write_str(kind.as_str()),
        }
    }
}

/// A failure carried in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error family (`engine`, `host`, `device`, `marshal`, ...).
    pub kind: String,
    pub message: String,
    /// Engine status code, when the failure has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl ErrorPayload {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// `[id, function, ...args]`
#[derive(Debug, Clone, PartialEq)]
pub struct CallEnvelope {
    pub id: u64,
    pub function: String,
    pub args: Vec<Value>,
}

/// `[id, function, success, result]`
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyEnvelope {
    pub id: u64,
    pub function: String,
    pub outcome: Result<Value, ErrorPayload>,
}

impl ReplyEnvelope {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// `[kind, kind, success, payload]`
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub outcome: Result<Value, ErrorPayload>,
}

impl EventEnvelope {
    pub fn ready() -> Self {
        Self {
            kind: EventKind::Ready,
            outcome: Ok(Value::Null),
        }
    }

    pub fn load_failed(error: ErrorPayload) -> Self {
        Self {
            kind: EventKind::Error,
            outcome: Err(error),
        }
    }

    pub fn read(name: &str, position: u64, length: usize) -> Self {
        Self::request(EventKind::Read, name, position, length)
    }

    pub fn block_read(name: &str, position: u64, length: usize) -> Self {
        Self::request(EventKind::BlockRead, name, position, length)
    }

    fn request(kind: EventKind, name: &str, position: u64, length: usize) -> Self {
        Self {
            kind,
            outcome: Ok(Value::List(vec![
                Value::from(name),
                Value::Int(position as i64),
                Value::Int(length as i64),
            ])),
        }
    }

    /// A write event. The bytes are already a private copy and travel by
    /// transfer.
    pub fn write(name: &str, position: u64, data: bytes::Bytes) -> Self {
        Self {
            kind: EventKind::Write,
            outcome: Ok(Value::List(vec![
                Value::from(name),
                Value::Int(position as i64),
                Value::Buffer(Buffer::fresh(data)),
            ])),
        }
    }

    pub fn id(&self) -> MessageId {
        MessageId::Event(self.kind)
    }
}

/// Everything a link carries.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(CallEnvelope),
    Reply(ReplyEnvelope),
    Event(EventEnvelope),
    /// Stop serving and close the link.
    Shutdown,
}

impl Message {
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Message::Call(call) => Some(MessageId::Call(call.id)),
            Message::Reply(reply) => Some(MessageId::Call(reply.id)),
            Message::Event(event) => Some(event.id()),
            Message::Shutdown => None,
        }
    }

    /// Visit every value the message carries, in wire order.
    pub fn for_each_value_mut(&mut self, f: &mut dyn FnMut(&mut Value)) {
        match self {
            Message::Call(call) => call.args.iter_mut().for_each(f),
            Message::Reply(ReplyEnvelope {
                outcome: Ok(value), ..
            })
            | Message::Event(EventEnvelope {
                outcome: Ok(value), ..
            }) => f(value),
            Message::Reply(_) | Message::Event(_) | Message::Shutdown => {}
        }
    }

    /// Replace every buffer that may share memory with the sender by a
    /// private copy. Transferable buffers are moved as they are.
    pub fn detach_buffers(&mut self) {
        self.for_each_value_mut(&mut |value| {
            value.for_each_buffer_mut(&mut |buf| {
                let shared = std::mem::replace(buf, Buffer::new(bytes::Bytes::new()));
                *buf = shared.detach();
            })
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_reserved_strings() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_name("onreadx"), None);
        assert_eq!(MessageId::Event(EventKind::BlockRead).to_string(), "onblockread");
        assert_eq!(MessageId::Call(7).to_string(), "7");
    }

    #[test]
    fn detaching_copies_shared_buffers_only() {
        let shared = bytes::Bytes::from_static(b"shared");
        let mut msg = Message::Call(CallEnvelope {
            id: 1,
            function: "ff_reader_dev_send".into(),
            args: vec![
                Value::from("in"),
                Value::Buffer(Buffer::new(shared.clone())),
                Value::Buffer(Buffer::fresh(vec![1, 2, 3])),
            ],
        });
        msg.detach_buffers();
        let Message::Call(call) = msg else {
            panic!("call expected");
        };
        let Value::Buffer(copied) = &call.args[1] else {
            panic!("buffer expected");
        };
        assert!(copied.is_transferable());
        assert_ne!(copied.as_slice().as_ptr(), shared.as_ptr());
        assert_eq!(copied.as_slice(), b"shared");
    }

    #[test]
    fn write_event_carries_a_transferable_copy() {
        let event = EventEnvelope::write("out", 12, bytes::Bytes::from_static(b"abc"));
        let value = event.outcome.expect("write events succeed");
        assert_eq!(value.transfer_count(), 1);
    }
}
