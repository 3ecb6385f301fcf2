/// Errors raised while converting between engine objects and host records.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// A record's buffers do not match the shape its format declares.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The format tag is not one the marshaler can lay out.
    #[error("unsupported {kind} format {format}")]
    UnsupportedFormat { kind: &'static str, format: i32 },

    /// An engine primitive failed during marshaling.
    #[error("{op} failed with engine code {code}")]
    Engine { op: &'static str, code: i32 },

    /// A required handle was null.
    #[error("null {0} handle")]
    NullHandle(&'static str),

    /// A value had the wrong type for the requested conversion.
    #[error("expected {expected}, found {found}")]
    Type {
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, MarshalError>;

pub(crate) fn check(op: &'static str, code: i32) -> Result<i32> {
    if code < 0 {
        Err(MarshalError::Engine { op, code })
    } else {
        Ok(code)
    }
}
