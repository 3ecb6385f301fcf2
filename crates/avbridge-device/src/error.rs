use std::fmt;
use std::sync::Arc;

/// An error raised by host code and carried through a device to the engine
/// call that was blocked on it.
///
/// Clones share the same underlying error, so the value re-raised at the
/// call site is the one the host produced.
#[derive(Clone)]
pub struct HostError(Arc<dyn std::error::Error + Send + Sync>);

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl HostError {
    pub fn new(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(error))
    }

    /// A host error that only carries a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self(Arc::new(Message(message.into())))
    }

    /// `true` when both values came from the same host error.
    pub fn same(a: &HostError, b: &HostError) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostError").field(&self.0.to_string()).finish()
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for HostError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<std::io::Error> for HostError {
    fn from(error: std::io::Error) -> Self {
        Self::new(error)
    }
}

/// Errors from device table operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// A device or file with this name is already registered.
    #[error("device already exists: {0}")]
    AlreadyExists(String),

    /// No device or file with this name is registered.
    #[error("device not registered: {0}")]
    NotRegistered(String),

    /// The device exists but is of a different kind.
    #[error("device {name} is not a {expected}")]
    WrongKind { name: String, expected: &'static str },

    /// A writer filesystem is already mounted at this prefix.
    #[error("writer filesystem already mounted at {0}")]
    AlreadyMounted(String),

    /// No writer filesystem is mounted at this prefix.
    #[error("no writer filesystem mounted at {0}")]
    NotMounted(String),

    /// A wait on the device was cancelled because the device went away.
    #[error("wait on {0} cancelled")]
    Cancelled(String),

    /// Host I/O failure while serving a device.
    #[error("host I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host-supplied error surfaced by a device operation.
    #[error("host error: {0}")]
    Host(#[from] HostError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let a = HostError::msg("boom");
        let b = a.clone();
        assert!(HostError::same(&a, &b));
        assert!(!HostError::same(&a, &HostError::msg("boom")));
        assert_eq!(b.to_string(), "boom");
    }

    #[test]
    fn io_errors_convert() {
        let err: DeviceError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, DeviceError::Io(_)));
        assert_eq!(err.to_string(), "host I/O error: disk gone");
    }
}
