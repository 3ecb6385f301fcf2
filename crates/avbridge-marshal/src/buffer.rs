use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A bulk byte buffer crossing the bridge boundary.
///
/// Buffers produced by copy-out are freshly allocated and marked
/// transferable: a link may hand them to the other side without copying, and
/// the sender gives them up. Other buffers may share memory with something
/// the sender keeps, so links copy them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    bytes: Bytes,
    #[serde(default)]
    transferable: bool,
}

macro_rules! typed_views {
    ($($from:ident, $to:ident, $ty:ty;)*) => {
        $(
            #[doc = concat!("Fresh transferable buffer holding little-endian `", stringify!($ty), "` samples.")]
            pub fn $from(samples: &[$ty]) -> Self {
                let mut out = Vec::with_capacity(samples.len() * std::mem::size_of::<$ty>());
                for sample in samples {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
                Self::fresh(out)
            }

            #[doc = concat!("Decode the contents as little-endian `", stringify!($ty), "` samples; a trailing partial sample is ignored.")]
            pub fn $to(&self) -> Vec<$ty> {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                self.bytes
                    .chunks_exact(WIDTH)
                    .map(|chunk| {
                        let mut raw = [0u8; WIDTH];
                        raw.copy_from_slice(chunk);
                        <$ty>::from_le_bytes(raw)
                    })
                    .collect()
            }
        )*
    };
}

impl Buffer {
    /// Wrap bytes the caller may still share.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            transferable: false,
        }
    }

    /// Wrap a freshly allocated buffer nobody else references.
    pub fn fresh(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            transferable: true,
        }
    }

    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::fresh(Bytes::copy_from_slice(data))
    }

    pub fn is_transferable(&self) -> bool {
        self.transferable
    }

    pub fn set_transferable(&mut self, transferable: bool) {
        self.transferable = transferable;
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Take the contents out, leaving an empty buffer with the same marking.
    pub fn take_bytes(&mut self) -> Bytes {
        std::mem::take(&mut self.bytes)
    }

    pub fn put_bytes(&mut self, bytes: Bytes) {
        self.bytes = bytes;
    }

    /// Make sure this buffer owns its memory exclusively.
    ///
    /// Transferable buffers already do; anything else is copied into a new
    /// allocation, which then becomes transferable.
    pub fn detach(self) -> Self {
        if self.transferable {
            self
        } else {
            Self::copy_from_slice(&self.bytes)
        }
    }

    typed_views! {
        from_i16, to_i16, i16;
        from_i32, to_i32, i32;
        from_i64, to_i64, i64;
        from_f32, to_f32, f32;
        from_f64, to_f64, f64;
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.bytes.len())
            .field("transferable", &self.transferable)
            .finish()
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::fresh(bytes)
    }
}

impl From<Bytes> for Buffer {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffers_are_transferable() {
        assert!(Buffer::fresh(vec![1, 2, 3]).is_transferable());
        assert!(!Buffer::new(Bytes::from_static(b"abc")).is_transferable());
    }

    #[test]
    fn detach_copies_shared_buffers_only() {
        let backing = Bytes::from(vec![7u8; 64]);
        let shared = Buffer::new(backing.slice(8..16));
        let detached = shared.detach();
        assert!(detached.is_transferable());
        assert_eq!(detached.as_slice(), &[7u8; 8]);

        let fresh = Buffer::fresh(vec![1u8, 2]);
        let ptr = fresh.as_slice().as_ptr();
        assert_eq!(fresh.detach().as_slice().as_ptr(), ptr);
    }

    #[test]
    fn typed_views_are_little_endian() {
        let buf = Buffer::from_f32(&[1.0, -0.5]);
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf.as_slice()[..4], &1.0f32.to_le_bytes());
        assert_eq!(buf.to_f32(), vec![1.0, -0.5]);
        assert_eq!(Buffer::from_i16(&[-2, 300]).to_i16(), vec![-2, 300]);
    }

    #[test]
    fn take_bytes_leaves_marking() {
        let mut buf = Buffer::fresh(vec![9u8; 4]);
        let taken = buf.take_bytes();
        assert_eq!(taken.len(), 4);
        assert!(buf.is_empty());
        assert!(buf.is_transferable());
    }
}
