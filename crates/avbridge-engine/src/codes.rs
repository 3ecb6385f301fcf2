//! Raw engine status codes.
//!
//! Negative values are failures (`-errno` or a tagged sentinel), zero or
//! positive values are success. Two negative codes are control signals rather
//! than failures: [`EAGAIN`] (retry later) and [`AVERROR_EOF`] (end of stream).

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EAGAIN: i32 = 6;
pub const ECANCELED: i32 = 11;
pub const ENOMEM: i32 = 12;
pub const EEXIST: i32 = 17;
pub const EINVAL: i32 = 22;
pub const ESPIPE: i32 = 29;
pub const ENOSYS: i32 = 38;

/// End of stream, `-MKTAG('E','O','F',' ')`.
pub const AVERROR_EOF: i32 = -0x2046_4f45;

/// Decoder hit invalid data.
pub const AVERROR_INVALIDDATA: i32 = -0x4144_4e49;

/// Requested codec/format/filter does not exist.
pub const AVERROR_NOT_FOUND: i32 = -0x444e_4ff8;

/// Missing timestamp sentinel.
pub const NOPTS_VALUE: i64 = i64::MIN;

/// Convert an errno value into an engine status code.
pub const fn averror(errno: i32) -> i32 {
    -errno
}

/// `true` for the retryable not-ready signal.
pub fn is_again(code: i32) -> bool {
    code == averror(EAGAIN)
}

/// `true` for the end-of-stream sentinel.
pub fn is_eof(code: i32) -> bool {
    code == AVERROR_EOF
}

/// Describe a status code in words.
pub fn describe(code: i32) -> String {
    if code >= 0 {
        return "Success".to_string();
    }
    let text = match code {
        AVERROR_EOF => "End of file",
        AVERROR_INVALIDDATA => "Invalid data found when processing input",
        AVERROR_NOT_FOUND => "Not found",
        c if c == averror(EPERM) => "Operation not permitted",
        c if c == averror(ENOENT) => "No such file or directory",
        c if c == averror(EIO) => "I/O error",
        c if c == averror(EAGAIN) => "Resource temporarily unavailable",
        c if c == averror(ECANCELED) => "Operation canceled",
        c if c == averror(ENOMEM) => "Cannot allocate memory",
        c if c == averror(EEXIST) => "File exists",
        c if c == averror(EINVAL) => "Invalid argument",
        c if c == averror(ESPIPE) => "Illegal seek",
        c if c == averror(ENOSYS) => "Function not implemented",
        _ => return format!("Error number {code} occurred"),
    };
    text.to_string()
}
