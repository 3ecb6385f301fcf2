use std::fmt;
use std::io;

use avbridge_device::DeviceError;
use avbridge_dispatch::BridgeError;
use avbridge_engine::codes::AVERROR_INVALIDDATA;
use avbridge_protocol::ProtocolError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FAILURE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn bridge_error(context: &str, err: BridgeError) -> CliError {
    match err {
        BridgeError::Io(source) | BridgeError::Device(DeviceError::Io(source)) => {
            io_error(context, source)
        }
        BridgeError::Timeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        BridgeError::Engine { code, .. } if code == AVERROR_INVALIDDATA => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        BridgeError::Marshal(_) | BridgeError::Protocol(ProtocolError::Malformed(_)) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        BridgeError::Config(_) | BridgeError::UnknownFunction(_) | BridgeError::BadArgument { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        BridgeError::Load(_)
        | BridgeError::DegradedNotAllowed
        | BridgeError::Engine { .. }
        | BridgeError::Host(_)
        | BridgeError::Device(_)
        | BridgeError::Terminated => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use avbridge_engine::codes::{averror, EIO};

    use super::*;

    #[test]
    fn engine_codes_pick_exit_codes() {
        let invalid = bridge_error("probe", BridgeError::engine("read", AVERROR_INVALIDDATA));
        assert_eq!(invalid.code, DATA_INVALID);
        let io = bridge_error("probe", BridgeError::engine("read", averror(EIO)));
        assert_eq!(io.code, FAILURE);
        assert!(io.message.starts_with("probe: read"));
    }

    #[test]
    fn timeouts_and_usage() {
        let timeout = bridge_error(
            "probe",
            BridgeError::Timeout {
                function: "ff_read_frame_multi".into(),
                after: Duration::from_secs(1),
            },
        );
        assert_eq!(timeout.code, TIMEOUT);
        assert_eq!(bridge_error("call", BridgeError::UnknownFunction("x".into())).code, USAGE);
    }

    #[test]
    fn missing_files_fail() {
        let err = io_error("open", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.code, FAILURE);
    }
}
