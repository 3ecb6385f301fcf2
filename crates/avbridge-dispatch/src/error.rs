use std::time::Duration;

use avbridge_device::{DeviceError, HostError};
use avbridge_engine::{codes, EngineError};
use avbridge_marshal::MarshalError;
use avbridge_protocol::{ErrorPayload, ProtocolError};

use crate::mode::Mode;

/// Errors surfaced by a bridge handle.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The engine could not be created.
    #[error(transparent)]
    Load(#[from] EngineError),

    /// Only the degraded engine build is usable, and the configuration
    /// does not allow it.
    #[error("accelerated engine unavailable and degraded execution not allowed")]
    DegradedNotAllowed,

    /// A metafunction step returned a failure code.
    #[error("{context}: {description}")]
    Engine {
        context: String,
        code: i32,
        description: String,
    },

    /// A host hook failed; the error is the one the hook produced.
    #[error("host error: {0}")]
    Host(HostError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// No function with this name is registered.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// An argument has the wrong type or shape.
    #[error("{function}: bad argument {index}: {reason}")]
    BadArgument {
        function: String,
        index: usize,
        reason: String,
    },

    /// Synchronous calls need the engine in the caller's context.
    #[error("synchronous calls are not available in {0} mode")]
    SyncUnavailable(Mode),

    /// A synchronous call produced a result that has to be awaited.
    #[error("{0} cannot complete synchronously")]
    WouldBlock(String),

    /// The handle was terminated or its engine context exited.
    #[error("bridge terminated")]
    Terminated,

    #[error("{function} timed out after {after:?}")]
    Timeout { function: String, after: Duration },

    /// A failure reported by the engine context that has no local variant.
    #[error("remote error: {0}")]
    Remote(ErrorPayload),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<HostError> for BridgeError {
    fn from(error: HostError) -> Self {
        Self::Host(error)
    }
}

impl BridgeError {
    /// A failed engine step with a described code.
    pub fn engine(context: impl Into<String>, code: i32) -> Self {
        Self::Engine {
            context: context.into(),
            code,
            description: codes::describe(code),
        }
    }

    /// The raw engine code behind this error, if any.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Engine { code, .. } => Some(*code),
            Self::Marshal(MarshalError::Engine { code, .. }) => Some(*code),
            _ => None,
        }
    }

    /// `true` when the failure is the retryable not-ready signal.
    pub fn is_again(&self) -> bool {
        self.code().is_some_and(codes::is_again)
    }

    /// Encode for a reply envelope.
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Engine { context, code, .. } => {
                ErrorPayload::new("engine", context.clone()).with_code(*code)
            }
            Self::Host(error) => ErrorPayload::new("host", error.to_string()),
            Self::Device(DeviceError::NotRegistered(name)) => {
                ErrorPayload::new("not_registered", name.clone())
            }
            Self::Device(DeviceError::AlreadyExists(name)) => {
                ErrorPayload::new("already_exists", name.clone())
            }
            Self::Device(DeviceError::Cancelled(name)) => {
                ErrorPayload::new("cancelled", name.clone())
            }
            Self::UnknownFunction(name) => ErrorPayload::new("unknown_function", name.clone()),
            Self::Terminated => ErrorPayload::new("terminated", self.to_string()),
            Self::Remote(payload) => payload.clone(),
            other => {
                let payload = ErrorPayload::new(other.kind(), other.to_string());
                match other.code() {
                    Some(code) => payload.with_code(code),
                    None => payload,
                }
            }
        }
    }

    /// Decode a reply envelope's error.
    pub fn from_payload(payload: ErrorPayload) -> Self {
        match (payload.kind.as_str(), payload.code) {
            ("engine", Some(code)) => Self::engine(payload.message, code),
            ("host", _) => Self::Host(HostError::msg(payload.message)),
            ("not_registered", _) => Self::Device(DeviceError::NotRegistered(payload.message)),
            ("already_exists", _) => Self::Device(DeviceError::AlreadyExists(payload.message)),
            ("cancelled", _) => Self::Device(DeviceError::Cancelled(payload.message)),
            ("unknown_function", _) => Self::UnknownFunction(payload.message),
            ("terminated", _) => Self::Terminated,
            _ => Self::Remote(payload),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "load",
            Self::DegradedNotAllowed => "degraded_not_allowed",
            Self::Engine { .. } => "engine",
            Self::Host(_) => "host",
            Self::Device(_) => "device",
            Self::Marshal(_) => "marshal",
            Self::Protocol(_) => "protocol",
            Self::UnknownFunction(_) => "unknown_function",
            Self::BadArgument { .. } => "bad_argument",
            Self::SyncUnavailable(_) => "sync_unavailable",
            Self::WouldBlock(_) => "would_block",
            Self::Terminated => "terminated",
            Self::Timeout { .. } => "timeout",
            Self::Remote(_) => "remote",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use avbridge_engine::codes::{averror, EAGAIN, EIO};

    use super::*;

    #[test]
    fn engine_errors_survive_the_wire() {
        let err = BridgeError::engine("Could not open codec", averror(EIO));
        let back = BridgeError::from_payload(err.to_payload());
        assert!(matches!(
            back,
            BridgeError::Engine { ref context, code, .. } if context == "Could not open codec" && code == -5
        ));
        assert_eq!(back.to_string(), "Could not open codec: I/O error");
    }

    #[test]
    fn device_errors_keep_their_variant() {
        let err = BridgeError::Device(DeviceError::NotRegistered("in".into()));
        assert!(matches!(
            BridgeError::from_payload(err.to_payload()),
            BridgeError::Device(DeviceError::NotRegistered(name)) if name == "in"
        ));
    }

    #[test]
    fn host_errors_keep_their_message() {
        let err = BridgeError::Host(HostError::msg("network down"));
        let back = BridgeError::from_payload(err.to_payload());
        assert!(matches!(back, BridgeError::Host(ref e) if e.to_string() == "network down"));
    }

    #[test]
    fn other_errors_become_remote() {
        let err = BridgeError::BadArgument {
            function: "av_frame_free".into(),
            index: 0,
            reason: "expected int, found string".into(),
        };
        let back = BridgeError::from_payload(err.to_payload());
        assert!(matches!(back, BridgeError::Remote(ref p) if p.kind == "bad_argument"));
    }

    #[test]
    fn again_is_detected() {
        assert!(BridgeError::engine("read", averror(EAGAIN)).is_again());
        assert!(!BridgeError::Terminated.is_again());
    }
}
