//! # wscore
//! A WebSocket protocol engine (RFC 6455): frame codec, close-code policy, fragmentation
//! reassembly, the opening handshake and a sans-io connection state machine.
//!
//! The engine never opens sockets. A transport hands it bytes with [`Connection::feed`] and
//! receives outbound bytes through the [`Transport`] it was constructed with; the application
//! observes the connection through a [`Handler`].
//!
//! ```text
//! raw bytes -> codec -> fragment -> connection -> Handler
//! Connection::send* -> codec -> Transport::write
//! ```
//!
//! # Features
//! - `logging`: Enables debug logging of negotiation, state transitions and close handling
//!   using the `log` crate.
//! - `simd`: Validates UTF-8 with `simdutf8`.
//! - `json`: Enables [`Connection::send_json`].
//!
//! # Server Example
//! ```rust
//! use bytes::Bytes;
//! use wscore::{Connection, FrameView, Handler, Options, Role, Transport};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(&self, ws: &Connection, message: FrameView) {
//!         let _ = ws.send(message);
//!     }
//! }
//!
//! struct Sink;
//!
//! impl Transport for Sink {
//!     fn write(&self, _bytes: Bytes) -> std::io::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn close(&self) {}
//! }
//!
//! let ws = Connection::new(Role::Server, Sink, Echo, Options::default());
//! ws.accept().unwrap();
//! ws.feed(b"GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\n\
//!     Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
//!     Sec-WebSocket-Version: 13\r\n\r\n");
//! assert!(ws.is_open());
//! ```
//!
//! # Memory Safety
//! - Maximum frame payload size (configurable, default 1 MiB)
//! - Maximum reassembled message size (configurable, default 2 MiB)
//! - Maximum handshake head size (configurable, default 8 KiB)

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod close;
pub mod codec;
mod connection;
pub mod draft;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod native;
mod options;

use thiserror::Error;

pub use close::CloseCode;
pub use connection::{Connection, Handler, ReadyState, Transport};
pub use draft::Draft;
pub use frame::{Frame, FrameBuilder, FrameView, OpCode};
pub use handshake::{HttpRequest, HttpResponse, Negotiation};
pub use options::Options;

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames with a payload size larger than this limit will be rejected to ensure memory safety
/// and prevent excessively large messages from impacting performance.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// The maximum allowed read buffer size, set to 2 MiB.
///
/// When a fragmented message grows past this size the connection is failed with
/// [`CloseCode::Size`].
pub const MAX_READ_BUFFER: usize = 2 * 1024 * 1024;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// The role the websocket endpoint is taking.
///
/// Clients mask every frame they send and reject masked frames; servers do the opposite.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => {
                write!(f, "server")
            }
            Self::Client => {
                write!(f, "client")
            }
        }
    }
}

/// Represents errors that can occur during WebSocket operations.
///
/// The errors fall into a few families:
///
/// - [`WebSocketError::IncompleteFrame`] is not a failure: the decoder needs more bytes.
/// - Invalid data received from the peer ([`WebSocketError::InvalidFrame`],
///   [`WebSocketError::InvalidCloseFrame`], [`WebSocketError::InvalidUTF8`], size limits).
/// - Handshake failures ([`WebSocketError::InvalidHandshake`], [`WebSocketError::NoMatchingDraft`]).
/// - Misuse of a connection that is not open, and I/O errors reported by the transport.
///
/// Failures on the receiving side close the connection; [`WebSocketError::close_code`] gives
/// the status code reported for them.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Fewer bytes are buffered than the next frame declares. Retry once more bytes arrived.
    #[error("Incomplete frame, {needed} more bytes needed")]
    IncompleteFrame { needed: usize },

    /// The frame violates the framing rules of RFC 6455.
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    /// A close frame violates the close code policy.
    #[error("Invalid close frame: {0}")]
    InvalidCloseFrame(#[from] CloseFrameError),

    /// The opening handshake is malformed or was rejected.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(#[from] HandshakeError),

    /// None of the configured drafts accepts the handshake.
    #[error("No draft matches the handshake")]
    NoMatchingDraft,

    /// A text message contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// A frame payload exceeds the configured maximum.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A fragmented message grew past the configured maximum.
    #[error("Message too large")]
    MessageTooLarge,

    /// The negotiated draft has no wire representation for the frame.
    #[error("Not supported by draft {0}")]
    UnsupportedByDraft(Draft),

    /// The connection is not in a state that allows the operation.
    #[error("Operation not allowed in state {0:?}")]
    InvalidState(ReadyState),

    /// Returned when attempting to send on a closing or closed connection.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Wraps errors from URL handling when building a client request.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Wraps I/O errors reported by the transport.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Occurs when serialization of JSON data fails.
    /// Only available when the `json` feature is enabled.
    #[cfg(feature = "json")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WebSocketError {
    /// Returns `true` for the "need more bytes" signal of the decoder.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Self::IncompleteFrame { .. })
    }

    /// Close code reported when this error terminates a connection.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidUTF8 | Self::InvalidFrame(FrameError::CloseReasonNotUtf8) => {
                CloseCode::Invalid
            }
            Self::FrameTooLarge | Self::MessageTooLarge => CloseCode::Size,
            Self::IoError(_) | Self::ConnectionClosed | Self::InvalidState(_) => {
                CloseCode::Abnormal
            }
            Self::UnsupportedByDraft(_) => CloseCode::Unsupported,
            _ => CloseCode::Protocol,
        }
    }
}

/// Framing violations detected while decoding or validating a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Reserved bits are set but no extension giving them a meaning was negotiated.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// The opcode lies in one of the reserved ranges (0x3-0x7, 0xB-0xF).
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A control frame (ping, pong, or close) has the FIN bit cleared.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A control frame payload exceeds 125 bytes.
    #[error("Control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(usize),

    /// The 64-bit extended payload length has its most significant bit set.
    #[error("Invalid payload length")]
    InvalidPayloadLength,

    /// A server received an unmasked frame from a client.
    #[error("Client frame is not masked")]
    MissingMask,

    /// A client received a masked frame from a server.
    #[error("Server frame is masked")]
    UnexpectedMask,

    /// A close frame carries a 1 byte payload.
    #[error("Close frame payload must be empty or at least 2 bytes")]
    CloseFrameTooShort,

    /// The reason of a close frame is not valid UTF-8.
    #[error("Close reason is not valid UTF-8")]
    CloseReasonNotUtf8,

    /// A new data frame started while a fragmented message was still open.
    #[error("Fragmented message interrupted")]
    InvalidFragment,

    /// A continuation frame arrived with no fragmented message in progress.
    #[error("Continuation frame without a message in progress")]
    InvalidContinuationFrame,

    /// A legacy sentinel frame could not be parsed.
    #[error("Malformed legacy frame (type byte {0:#04x})")]
    MalformedLegacyFrame(u8),
}

/// Close frames that must not be sent or accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseFrameError {
    /// Close frames cannot be fragmented.
    #[error("Close frame has FIN cleared")]
    NotFinal,

    /// Close frames cannot carry reserved bits.
    #[error("Close frame has reserved bits set")]
    ReservedBitsSet,

    /// The code is reserved, protocol-invalid or out of range.
    #[error("Close code {0} must not be sent")]
    CodeNotSendable(u16),

    /// A reason was given without a status code.
    #[error("Close reason without a close code")]
    ReasonWithoutCode,

    /// Code 1007 sent without the reason describing the invalid payload.
    #[error("Close code {0} requires a reason")]
    MissingReason(u16),

    /// Code and reason together exceed the 125 byte control frame limit.
    #[error("Close reason of {0} bytes is too long")]
    ReasonTooLong(usize),
}

/// Opening handshake failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The HTTP head could not be parsed.
    #[error("Malformed HTTP head")]
    Malformed,

    /// The HTTP head grew past the configured maximum without terminating.
    #[error("HTTP head exceeds {0} bytes")]
    HeadTooLarge(usize),

    /// The opening request does not use the GET method.
    #[error("Invalid method {0}")]
    InvalidMethod(String),

    /// Returned when receiving an HTTP status code other than 101.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The "Upgrade" header is missing or does not name websocket.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// The "Connection" header is missing or does not contain upgrade.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// The client request carries no "Sec-WebSocket-Key".
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The client key is not the base64 encoding of 16 bytes.
    #[error("Sec-WebSocket-Key header is invalid")]
    InvalidSecWebSocketKey,

    /// "Sec-WebSocket-Version" is not 13.
    #[error("Sec-Websocket-Version must be 13")]
    InvalidSecWebsocketVersion,

    /// "Sec-WebSocket-Accept" does not match the key sent in the request.
    #[error("Sec-WebSocket-Accept does not match the request key")]
    AcceptMismatch,

    /// The server selected a subprotocol the client did not offer.
    #[error("Unsolicited subprotocol {0}")]
    UnsolicitedProtocol(String),

    /// The server accepted an extension the client did not offer.
    #[error("Unsolicited extension {0}")]
    UnsolicitedExtension(String),

    /// A legacy handshake without the required "Origin" or "Host" header.
    #[error("Missing {0} header")]
    MissingHeader(&'static str),
}
