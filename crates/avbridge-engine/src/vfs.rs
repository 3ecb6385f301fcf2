//! Virtual filesystem trap surface.
//!
//! The engine performs all file I/O through these calls. They are
//! synchronous: a device that has no data yet must answer with
//! [`Errno::EAGAIN`] instead of blocking.

use std::fmt;

use crate::codes;

/// An open file descriptor handed out by [`Vfs::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(pub u32);

/// A positive errno value returned by a trap.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const EPERM: Errno = Errno(codes::EPERM);
    pub const ENOENT: Errno = Errno(codes::ENOENT);
    pub const EIO: Errno = Errno(codes::EIO);
    pub const EAGAIN: Errno = Errno(codes::EAGAIN);
    pub const ECANCELED: Errno = Errno(codes::ECANCELED);
    pub const EEXIST: Errno = Errno(codes::EEXIST);
    pub const EINVAL: Errno = Errno(codes::EINVAL);
    pub const ESPIPE: Errno = Errno(codes::ESPIPE);

    /// Engine status code for this errno.
    pub fn code(self) -> i32 {
        codes::averror(self.0)
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Errno({}: {})", self.0, codes::describe(self.code()))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codes::describe(self.code()))
    }
}

/// Open flags, using the usual `O_*` bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(0);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(0o1);
    pub const READ_WRITE: OpenFlags = OpenFlags(0o2);
    pub const CREATE: OpenFlags = OpenFlags(0o100);
    pub const TRUNCATE: OpenFlags = OpenFlags(0o1000);

    const ACCESS_MASK: u32 = 0o3;

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// The access mode permits writing.
    pub fn writable(self) -> bool {
        self.0 & Self::ACCESS_MASK != 0
    }

    /// The access mode permits reading.
    pub fn readable(self) -> bool {
        self.0 & Self::ACCESS_MASK != Self::WRITE_ONLY.0
    }
}

impl std::ops::BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        OpenFlags(self.0 | rhs.0)
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Filesystem traps the engine calls during an operation.
///
/// Each descriptor carries its own position: `read` and `write` operate at
/// that position and advance it by the number of bytes transferred.
pub trait Vfs: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Fd, Errno>;

    fn close(&self, fd: Fd) -> Result<(), Errno>;

    fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize, Errno>;

    fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize, Errno>;

    fn seek(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64, Errno>;

    /// Total size, for files whose size is known.
    fn size(&self, fd: Fd) -> Result<Option<u64>, Errno>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_modes() {
        assert!(!OpenFlags::READ_ONLY.writable());
        assert!(OpenFlags::READ_ONLY.readable());
        assert!(OpenFlags::WRITE_ONLY.writable());
        assert!(!OpenFlags::WRITE_ONLY.readable());
        let rw = OpenFlags::READ_WRITE | OpenFlags::CREATE;
        assert!(rw.writable() && rw.readable());
        assert!(rw.contains(OpenFlags::CREATE));
    }

    #[test]
    fn errno_maps_to_negative_code() {
        assert_eq!(Errno::EAGAIN.code(), -6);
        assert_eq!(Errno::ESPIPE.to_string(), "Illegal seek");
    }
}
