use std::fmt;

use num_enum::TryFromPrimitive;

/// Status codes used to categorize errors.
///
/// # Ranges:
/// - 0xxx: Success
/// - 1xxx: General errors
/// - 2xxx: Data errors
/// - 3xxx: Authentication
/// - 4xxx: Subscription state and usage
/// - 5xxx: Payload and callback processing
/// - 6xxx: Network / IO
/// - 8xxx: Wire protocol
///
/// `num_enum::TryFromPrimitive` gives a native `TryFrom<u32>`, which is what
/// the metrics tags and the CLI exit codes are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Success ===
    Success = 0,

    // === 1xxx: General ===
    Unknown = 1000,
    Unsupported = 1001,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Data ===
    NotFound = 2000,
    InvalidData = 2009,

    // === 3xxx: Auth ===
    AuthFailed = 3000,

    // === 4xxx: Subscription state ===
    RateLimited = 4000,
    SubscribeModeConflict = 4004,

    // === 5xxx: Payload / callbacks ===
    SerializationFailed = 5003,
    DeserializationFailed = 5004,
    CallbackFailed = 5008,

    // === 6xxx: Network/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    NotConnected = 6008,
    Stopped = 6009,

    // === 8xxx: Protocol ===
    InvalidFrame = 8000,
    InvalidUtf8 = 8004,
    SizeLimit = 8007,
    ServerError = 8012,
}

////////////////////////////////////////////////////////////////////////////////
// Inherent methods
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Numeric representation of the status code.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Tries to map a `u32` back onto a `StatusCode`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Returns `true` if an operation failing with this code may succeed when
    /// the caller retries it (after an explicit reconnect for network codes).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionFailed
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::RateLimited
        )
    }

    /// Usage errors: the request itself is wrong (bad arguments, publishing
    /// on a subscribed link). Retrying unchanged will fail again.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgs | Self::SubscribeModeConflict | Self::Stopped
        )
    }

    /// Network range (6xxx).
    pub fn is_network_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Protocol range (8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }
}

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::ConnectionClosed.is_retryable());
        assert!(!StatusCode::SubscribeModeConflict.is_retryable());
        assert!(!StatusCode::InvalidArgs.is_retryable());
    }

    #[test]
    fn test_usage_errors() {
        assert!(StatusCode::SubscribeModeConflict.is_usage_error());
        assert!(StatusCode::InvalidArgs.is_usage_error());
        assert!(!StatusCode::ConnectionFailed.is_usage_error());
    }

    /// Checks the `TryFrom<u32>` round trip and the `from_u32` helper.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::SubscribeModeConflict.code();
        assert_eq!(n, 4004);
        assert_eq!(
            StatusCode::try_from(n).unwrap(),
            StatusCode::SubscribeModeConflict
        );
        assert!(StatusCode::from_u32(99999).is_none());
    }

    #[test]
    fn test_ranges() {
        assert!(StatusCode::NotConnected.is_network_error());
        assert!(!StatusCode::InvalidFrame.is_network_error());
        assert!(StatusCode::InvalidFrame.is_protocol_error());
    }

    /// Display must carry both the variant name and the numeric code.
    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::Stopped);
        assert!(s.contains("Stopped"), "got: {s}");
        assert!(s.contains("6009"), "got: {s}");
    }
}
