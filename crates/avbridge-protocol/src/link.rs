//! Bidirectional message links between a host and an engine context.
//!
//! A memory link passes messages between threads of one process: buffers
//! marked transferable move across untouched, any other buffer is copied
//! first so the receiver never shares memory with the sender. A stream link
//! carries the framed wire form over a byte stream; a reader thread decodes
//! incoming frames into the receiving queue.

use std::io::{Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::codec::FrameConfig;
use crate::envelope::Message;
use crate::error::{FrameError, ProtocolError, Result};
use crate::reader::FrameReader;
use crate::wire::{self, WireDecoder};
use crate::writer::FrameWriter;

type BoxWriter = Box<dyn Write + Send>;

#[derive(Clone)]
enum SenderKind {
    Memory(mpsc::UnboundedSender<Message>),
    Stream(Arc<Mutex<FrameWriter<BoxWriter>>>),
}

/// Sending half of a link. Cheap to clone.
#[derive(Clone)]
pub struct LinkSender {
    kind: SenderKind,
}

impl LinkSender {
    pub fn send(&self, mut message: Message) -> Result<()> {
        tracing::trace!(id = ?message.id(), "link send");
        match &self.kind {
            SenderKind::Memory(tx) => {
                message.detach_buffers();
                tx.send(message).map_err(|_| ProtocolError::Closed)
            }
            SenderKind::Stream(writer) => {
                let mut writer = writer.lock();
                let frames = wire::encode(message, writer.config())?;
                writer.write_frames(&frames).map_err(|err| match err {
                    FrameError::ConnectionClosed => ProtocolError::Closed,
                    FrameError::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe => {
                        ProtocolError::Closed
                    }
                    other => ProtocolError::Frame(other),
                })
            }
        }
    }
}

impl std::fmt::Debug for LinkSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            SenderKind::Memory(_) => "memory",
            SenderKind::Stream(_) => "stream",
        };
        f.debug_struct("LinkSender").field("kind", &kind).finish()
    }
}

/// Receiving half of a link.
#[derive(Debug)]
pub struct LinkReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl LinkReceiver {
    /// Next message, or `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Blocking variant of [`recv`](Self::recv) for threads outside a runtime.
    pub fn blocking_recv(&mut self) -> Option<Message> {
        self.rx.blocking_recv()
    }
}

/// One endpoint of a link.
#[derive(Debug)]
pub struct Link {
    pub sender: LinkSender,
    pub receiver: LinkReceiver,
}

impl Link {
    pub fn split(self) -> (LinkSender, LinkReceiver) {
        (self.sender, self.receiver)
    }
}

/// Two connected in-process endpoints.
pub fn memory_pair() -> (Link, Link) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Link {
            sender: LinkSender {
                kind: SenderKind::Memory(b_tx),
            },
            receiver: LinkReceiver { rx: a_rx },
        },
        Link {
            sender: LinkSender {
                kind: SenderKind::Memory(a_tx),
            },
            receiver: LinkReceiver { rx: b_rx },
        },
    )
}

/// An endpoint speaking the framed wire form over `reader`/`writer`.
pub fn stream_link<R, W>(reader: R, writer: W, config: FrameConfig) -> std::io::Result<Link>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let frames = FrameReader::with_config(reader, config.clone());
    std::thread::Builder::new()
        .name("avbridge-link-reader".into())
        .spawn(move || read_loop(frames, tx))?;
    Ok(Link {
        sender: LinkSender {
            kind: SenderKind::Stream(Arc::new(Mutex::new(FrameWriter::with_config(
                Box::new(writer) as BoxWriter,
                config,
            )))),
        },
        receiver: LinkReceiver { rx },
    })
}

/// Two endpoints connected through a Unix socket pair.
#[cfg(unix)]
pub fn socket_pair(config: FrameConfig) -> std::io::Result<(Link, Link)> {
    let (a, b) = std::os::unix::net::UnixStream::pair()?;
    let a_read = a.try_clone()?;
    let b_read = b.try_clone()?;
    Ok((
        stream_link(a_read, SocketWriter(a), config.clone())?,
        stream_link(b_read, SocketWriter(b), config)?,
    ))
}

/// Write half of a socket. Dropping it shuts the direction down so the
/// peer's reader sees end of stream while our own reader is still running.
#[cfg(unix)]
struct SocketWriter(std::os::unix::net::UnixStream);

#[cfg(unix)]
impl Write for SocketWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

#[cfg(unix)]
impl Drop for SocketWriter {
    fn drop(&mut self) {
        let _ = self.0.shutdown(std::net::Shutdown::Write);
    }
}

fn read_loop<R: Read>(mut frames: FrameReader<R>, tx: mpsc::UnboundedSender<Message>) {
    let mut decoder = WireDecoder::new();
    loop {
        match frames.read_frame() {
            Ok(frame) => match decoder.push(frame) {
                Ok(Some(message)) => {
                    tracing::trace!(id = ?message.id(), "link receive");
                    if tx.send(message).is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(error) => tracing::warn!(%error, "malformed message dropped"),
            },
            Err(FrameError::ConnectionClosed) => {
                tracing::debug!("link closed by peer");
                return;
            }
            Err(error) => {
                tracing::warn!(%error, "link read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use avbridge_marshal::{Buffer, Value};

    use super::*;
    use crate::envelope::{CallEnvelope, EventEnvelope, ReplyEnvelope};

    #[tokio::test]
    async fn memory_link_moves_transferable_buffers() {
        let (host, engine) = memory_pair();
        let (_, mut engine_rx) = engine.split();
        let fresh = bytes::Bytes::from(vec![1u8, 2, 3]);
        let ptr = fresh.as_ptr();
        host.sender
            .send(Message::Call(CallEnvelope {
                id: 1,
                function: "writeFile".into(),
                args: vec![Value::from("a"), Value::Buffer(Buffer::fresh(fresh))],
            }))
            .expect("send should work");
        let Some(Message::Call(call)) = engine_rx.recv().await else {
            panic!("call expected");
        };
        let Value::Buffer(buf) = &call.args[1] else {
            panic!("buffer expected");
        };
        assert_eq!(buf.as_slice().as_ptr(), ptr);
    }

    #[tokio::test]
    async fn dropped_peer_closes_memory_link() {
        let (host, engine) = memory_pair();
        drop(engine);
        assert!(matches!(
            host.sender.send(Message::Shutdown),
            Err(ProtocolError::Closed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn socket_pair_carries_calls_replies_and_events() {
        let (host, engine) = socket_pair(FrameConfig::default()).expect("socket pair should open");
        let (host_tx, mut host_rx) = host.split();
        let (engine_tx, mut engine_rx) = engine.split();

        host_tx
            .send(Message::Call(CallEnvelope {
                id: 5,
                function: "ff_reader_dev_send".into(),
                args: vec![
                    Value::from("in"),
                    Value::Buffer(Buffer::new(bytes::Bytes::from_static(b"payload"))),
                ],
            }))
            .expect("call should send");
        let Some(Message::Call(call)) = engine_rx.recv().await else {
            panic!("call expected");
        };
        assert_eq!(call.id, 5);
        assert_eq!(call.args[1], Value::Buffer(Buffer::fresh(&b"payload"[..])));

        engine_tx
            .send(Message::Event(EventEnvelope::block_read("in", 4096, 512)))
            .expect("event should send");
        engine_tx
            .send(Message::Reply(ReplyEnvelope {
                id: 5,
                function: "ff_reader_dev_send".into(),
                outcome: Ok(Value::Null),
            }))
            .expect("reply should send");
        assert!(matches!(host_rx.recv().await, Some(Message::Event(_))));
        assert!(matches!(host_rx.recv().await, Some(Message::Reply(r)) if r.id == 5));

        drop(host_tx);
        assert_eq!(engine_rx.recv().await, None);
    }
}
