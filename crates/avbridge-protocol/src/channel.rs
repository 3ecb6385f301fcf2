//! Channel IDs used on a link.
//!
//! Each envelope is one JSON frame on its channel, preceded by one BUFFER
//! frame per bulk buffer it carries.

/// Link management (shutdown).
pub const CONTROL: u16 = 0;

/// Calls from the host.
pub const CALL: u16 = 1;

/// Replies to calls, correlated by numeric id.
pub const REPLY: u16 = 2;

/// Events from the engine context, identified by reserved string ids.
pub const EVENT: u16 = 3;

/// Out-of-band buffer contents for the next envelope.
pub const BUFFER: u16 = 4;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        CALL => "CALL",
        REPLY => "REPLY",
        EVENT => "EVENT",
        BUFFER => "BUFFER",
        _ => "UNKNOWN",
    }
}

/// Returns true if the channel carries a JSON envelope.
pub fn carries_envelope(id: u16) -> bool {
    matches!(id, CONTROL | CALL | REPLY | EVENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(channel_name(BUFFER), "BUFFER");
        assert_eq!(channel_name(42), "UNKNOWN");
        assert!(carries_envelope(EVENT));
        assert!(!carries_envelope(BUFFER));
    }
}
