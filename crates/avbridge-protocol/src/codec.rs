use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;

type Result<T> = std::result::Result<T, FrameError>;

/// Frame header: magic (2) + length (4) + channel (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "AV" (0x41 0x56).
pub const MAGIC: [u8; 2] = [0x41, 0x56];

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A framed payload with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Channel  │ Payload          │
/// │ 0x41 0x56    │ (4B LE)  │ (2B LE)  │ (Length bytes)   │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u16_le(channel);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }
    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let channel = u16::from_le_bytes([src[6], src[7]]);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Frame { channel, payload }))
}

/// Configuration for framed links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let mut buf = BytesMut::new();
        encode_frame(1, b"[1,\"ff_error\",-11]", &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 18);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(frame.channel, 1);
        assert_eq!(frame.payload.as_ref(), b"[1,\"ff_error\",-11]");
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_and_payload() {
        let mut buf = BytesMut::from(&[0x41, 0x56, 0x00][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());

        let mut buf = BytesMut::new();
        encode_frame(4, b"hello", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 2);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn invalid_magic() {
        let mut buf = BytesMut::from(&[0x49, 0x50, 0, 0, 0, 0, 0, 0][..]);
        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::InvalidMagic)
        ));
    }

    #[test]
    fn payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u32_le(1024);
        buf.put_u16_le(4);
        assert!(matches!(
            decode_frame(&mut buf, 16),
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn empty_buffer_frame() {
        let mut buf = BytesMut::new();
        encode_frame(4, b"", &mut buf).unwrap();
        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(frame.wire_size(), HEADER_SIZE);
    }
}
