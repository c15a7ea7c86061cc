//! # Close codes
//!
//! Status codes carried by close frames, as registered in
//! [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! Every 16-bit value maps to exactly one [`Classification`], which decides whether a
//! close frame carrying that code may be put on the wire:
//!
//! | Range / code                     | Classification                               |
//! |----------------------------------|----------------------------------------------|
//! | 0-999                            | [`Classification::ProtocolInvalidToSend`]    |
//! | 1000-1003, 1008-1014             | [`Classification::Normal`]                   |
//! | 1004, 1005, 1006, 1015           | [`Classification::ReservedNeverSent`]        |
//! | 1007                             | [`Classification::RequiresReason`]           |
//! | 1016-2999                        | [`Classification::ProtocolInvalidToSend`]    |
//! | 3000-4999                        | [`Classification::Normal`]                   |
//! | 5000 and above                   | [`Classification::OutOfRange`]               |
//!
//! A close frame without any code is also sendable, provided its reason is empty.

/// Status code explaining why a connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000, the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001, an endpoint is going away (server shutdown, page navigation).
    Away,
    /// 1002, the endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003, the endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1004, reserved without meaning.
    Reserved,
    /// 1005, no status code was present. Never sent on the wire.
    Status,
    /// 1006, the connection was closed without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007, a message contained data inconsistent with its type (e.g. non UTF-8 text).
    Invalid,
    /// 1008, a message violated the endpoint's policy.
    Policy,
    /// 1009, a message was too big to process.
    Size,
    /// 1010, the client expected the server to negotiate an extension.
    Extension,
    /// 1011, the server encountered an unexpected condition.
    Error,
    /// 1012, the service is restarting.
    Restart,
    /// 1013, the service is overloaded, try again later.
    Again,
    /// 1014, a gateway received an invalid response from upstream.
    BadGateway,
    /// 1015, the TLS handshake failed. Never sent on the wire.
    Tls,
    /// 1016-2999, reserved for future revisions of the protocol.
    Iana(u16),
    /// 3000-4999, registered by libraries, frameworks and applications.
    Library(u16),
    /// Any other value.
    Bad(u16),
}

/// Wire-level policy class of a close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Sendable with or without a reason.
    Normal,
    /// Sendable only with a non-empty reason. Applies to 1007, whose reason
    /// describes the offending payload. A received 1007 may omit it.
    RequiresReason,
    /// Reserved by the protocol for local reporting, never put on the wire.
    ReservedNeverSent,
    /// Below 1000 or in the protocol reserved range 1016-2999.
    ProtocolInvalidToSend,
    /// Above the registry (5000 and up).
    OutOfRange,
}

/// Classifies a raw close code.
pub fn classify(code: u16) -> Classification {
    match code {
        1000..=1003 | 1008..=1014 | 3000..=4999 => Classification::Normal,
        1007 => Classification::RequiresReason,
        1004..=1006 | 1015 => Classification::ReservedNeverSent,
        0..=999 | 1016..=2999 => Classification::ProtocolInvalidToSend,
        _ => Classification::OutOfRange,
    }
}

/// Returns whether a close frame carrying `code` may be sent.
///
/// `None` stands for a close frame without a status code, which is only valid when it carries
/// no reason either.
pub fn is_valid_to_send(code: Option<u16>, reason_present: bool) -> bool {
    match code {
        None => !reason_present,
        Some(code) => match classify(code) {
            Classification::Normal => true,
            Classification::RequiresReason => reason_present,
            _ => false,
        },
    }
}

impl CloseCode {
    /// Returns the policy class of this code.
    pub fn classification(self) -> Classification {
        classify(self.into())
    }

    /// Returns `true` if the code may appear on the wire in some close frame.
    ///
    /// [`CloseCode::Invalid`] is allowed here even though it additionally needs a reason.
    pub fn is_allowed(self) -> bool {
        matches!(
            self.classification(),
            Classification::Normal | Classification::RequiresReason
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1004 => Self::Reserved,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1010 => Self::Extension,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            1014 => Self::BadGateway,
            1015 => Self::Tls,
            1016..=2999 => Self::Iana(code),
            3000..=4999 => Self::Library(code),
            _ => Self::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Reserved => 1004,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::BadGateway => 1014,
            CloseCode::Tls => 1015,
            CloseCode::Iana(code) | CloseCode::Library(code) | CloseCode::Bad(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_registry() {
        for code in [1000, 1001, 1002, 1003, 1008, 1009, 1010, 1011, 1012, 1013, 1014] {
            assert_eq!(classify(code), Classification::Normal, "code {code}");
        }
        for code in [1004, 1005, 1006, 1015] {
            assert_eq!(classify(code), Classification::ReservedNeverSent, "code {code}");
        }
        assert_eq!(classify(1007), Classification::RequiresReason);
    }

    #[test]
    fn test_classify_ranges() {
        assert_eq!(classify(0), Classification::ProtocolInvalidToSend);
        assert_eq!(classify(999), Classification::ProtocolInvalidToSend);
        assert_eq!(classify(1016), Classification::ProtocolInvalidToSend);
        assert_eq!(classify(1999), Classification::ProtocolInvalidToSend);
        assert_eq!(classify(2999), Classification::ProtocolInvalidToSend);
        assert_eq!(classify(3000), Classification::Normal);
        assert_eq!(classify(3999), Classification::Normal);
        assert_eq!(classify(4000), Classification::Normal);
        assert_eq!(classify(4999), Classification::Normal);
        assert_eq!(classify(5000), Classification::OutOfRange);
        assert_eq!(classify(u16::MAX), Classification::OutOfRange);
    }

    #[test]
    fn test_is_valid_to_send() {
        assert!(is_valid_to_send(None, false));
        assert!(!is_valid_to_send(None, true));

        assert!(is_valid_to_send(Some(1000), false));
        assert!(is_valid_to_send(Some(1000), true));
        assert!(is_valid_to_send(Some(4321), true));

        assert!(!is_valid_to_send(Some(1007), false));
        assert!(is_valid_to_send(Some(1007), true));

        assert!(!is_valid_to_send(Some(1005), false));
        assert!(!is_valid_to_send(Some(1006), true));
        assert!(!is_valid_to_send(Some(1015), false));
        assert!(!is_valid_to_send(Some(2000), false));
        assert!(!is_valid_to_send(Some(5000), false));
    }

    #[test]
    fn test_u16_conversion_is_lossless() {
        for code in [0u16, 999, 1000, 1005, 1007, 1015, 1016, 2999, 3000, 4999, 5000, u16::MAX] {
            assert_eq!(u16::from(CloseCode::from(code)), code);
        }
        assert_eq!(CloseCode::from(1000), CloseCode::Normal);
        assert_eq!(CloseCode::from(1500), CloseCode::Iana(1500));
        assert_eq!(CloseCode::from(3500), CloseCode::Library(3500));
        assert_eq!(CloseCode::from(42), CloseCode::Bad(42));
    }

    #[test]
    fn test_is_allowed() {
        assert!(CloseCode::Normal.is_allowed());
        assert!(CloseCode::Invalid.is_allowed());
        assert!(CloseCode::Library(4000).is_allowed());
        assert!(!CloseCode::Status.is_allowed());
        assert!(!CloseCode::Abnormal.is_allowed());
        assert!(!CloseCode::Tls.is_allowed());
        assert!(!CloseCode::Reserved.is_allowed());
        assert!(!CloseCode::Iana(2000).is_allowed());
        assert!(!CloseCode::Bad(6000).is_allowed());
    }
}
