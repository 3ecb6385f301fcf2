use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::FrameError;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Write a batch of frames back to back, then flush once.
    pub fn write_frames(&mut self, frames: &[Frame]) -> Result<(), FrameError> {
        self.buf.clear();
        for frame in frames {
            if frame.payload.len() > self.config.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: frame.payload.len(),
                    max: self.config.max_payload_size,
                });
            }
            encode_frame(frame.channel, &frame.payload, &mut self.buf)?;
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Encode and send a payload on a channel.
    pub fn send(&mut self, channel: u16, payload: &[u8]) -> Result<(), FrameError> {
        self.write_frames(&[Frame::new(channel, bytes::Bytes::copy_from_slice(payload))])
    }

    pub fn flush(&mut self) -> Result<(), FrameError> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::decode_frame;

    #[test]
    fn batch_is_written_in_order() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer
            .write_frames(&[Frame::new(4, &b"buf"[..]), Frame::new(1, &b"[1,\"f\"]"[..])])
            .unwrap();
        let mut wire = BytesMut::from(&writer.into_inner().into_inner()[..]);
        let first = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        let second = decode_frame(&mut wire, usize::MAX).unwrap().unwrap();
        assert_eq!((first.channel, second.channel), (4, 1));
    }

    #[test]
    fn oversized_payload_is_refused_before_writing() {
        let mut writer = FrameWriter::with_config(
            Cursor::new(Vec::<u8>::new()),
            FrameConfig {
                max_payload_size: 2,
            },
        );
        let err = writer.send(1, b"abc").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 3, max: 2 }));
        assert!(writer.into_inner().into_inner().is_empty());
    }

    #[test]
    fn closed_stream_is_reported() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut writer = FrameWriter::new(Closed);
        assert!(matches!(
            writer.send(1, b"x"),
            Err(FrameError::ConnectionClosed)
        ));
    }
}
