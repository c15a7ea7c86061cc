//! # Frame
//!
//! The `frame` module implements WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! - [`Frame`]: one wire-level frame with all protocol metadata. Frames are immutable once built.
//! - [`FrameBuilder`]: assembles a [`Frame`] and validates it on [`FrameBuilder::build`].
//! - [`FrameView`]: lightweight (opcode, payload) pair used for complete application messages.
//!
//! ### Frame Binary Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! :                     Payload Data continued ...                :
//! +---------------------------------------------------------------+
//! ```
//!
//! ### Frame Construction
//!
//! ```rust
//! use wscore::close::CloseCode;
//! use wscore::frame::{FrameBuilder, OpCode};
//!
//! let text = FrameBuilder::text("Hello, WebSocket!").build().unwrap();
//! assert_eq!(text.opcode(), OpCode::Text);
//!
//! let close = FrameBuilder::close()
//!     .code(CloseCode::Away)
//!     .reason("shutting down")
//!     .build()
//!     .unwrap();
//! assert_eq!(close.close_code(), Some(CloseCode::Away));
//!
//! // a reason without a code is rejected
//! assert!(FrameBuilder::close().code(None).reason("bye").build().is_err());
//! ```
use bytes::{Bytes, BytesMut};

use crate::{
    close::{self, Classification, CloseCode},
    CloseFrameError, FrameError, Result, WebSocketError,
};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

pub(crate) const MAX_HEAD_SIZE: usize = 16;

/// The 4-bit frame opcode.
///
/// Data opcodes (`Text`, `Binary`, and `Continuation` for the tail of a fragmented message)
/// carry application messages. Control opcodes (`Close`, `Ping`, `Pong`) manage the connection
/// and may interleave with the fragments of a message.
///
/// The ranges 0x3-0x7 and 0xB-0xF are reserved; frames using them are rejected.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    /// Requests a `Pong` with the same payload.
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    ///
    /// Control frames cannot be fragmented and carry at most 125 bytes of payload.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    /// Returns `true` for `Text` and `Binary`, the opcodes that start a message.
    pub fn is_data(&self) -> bool {
        matches!(*self, OpCode::Text | OpCode::Binary)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    /// Attempts to convert the 4-bit opcode field of a frame header into an `OpCode`.
    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::InvalidOpCode(value).into()),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A lightweight view of a complete message or control frame: just the opcode and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView {
    /// The operation code indicating the type of frame (Text, Binary, Close, etc.)
    pub opcode: OpCode,
    /// The payload, already unmasked and, for fragmented messages, concatenated.
    pub payload: Bytes,
}

impl FrameView {
    /// Extracts the close code from a Close payload, `None` if the payload is shorter than 2 bytes.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = u16::from_be_bytes(self.payload.get(0..2)?.try_into().ok()?);
        Some(CloseCode::from(code))
    }

    /// Extracts the close reason from a Close payload, `None` if absent or not UTF-8.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Returns the payload as text, `None` if it is not valid UTF-8.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Creates a text message.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Creates a close view with a close code and reason.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason: &[u8] = reason.as_ref();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);

        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Creates a ping with the given payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a pong with the given payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }
}

impl From<FrameView> for (OpCode, Bytes) {
    fn from(val: FrameView) -> Self {
        (val.opcode, val.payload)
    }
}

impl From<(OpCode, Bytes)> for FrameView {
    fn from((opcode, payload): (OpCode, Bytes)) -> Self {
        Self { opcode, payload }
    }
}

impl From<(OpCode, BytesMut)> for FrameView {
    fn from((opcode, payload): (OpCode, BytesMut)) -> Self {
        Self {
            opcode,
            payload: payload.freeze(),
        }
    }
}

impl From<Frame> for FrameView {
    fn from(value: Frame) -> Self {
        Self::from((value.opcode, value.payload))
    }
}

/// Status code and reason of a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CloseBody {
    code: Option<CloseCode>,
    reason: String,
}

impl CloseBody {
    /// Splits a close payload into code and reason.
    fn parse(payload: &[u8]) -> std::result::Result<Self, FrameError> {
        match payload.len() {
            0 => Ok(Self {
                code: None,
                reason: String::new(),
            }),
            1 => Err(FrameError::CloseFrameTooShort),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| FrameError::CloseReasonNotUtf8)?;
                Ok(Self {
                    code: Some(CloseCode::from(code)),
                    reason: reason.to_owned(),
                })
            }
        }
    }

    fn encode(&self) -> Bytes {
        let Some(code) = self.code else {
            return Bytes::copy_from_slice(self.reason.as_bytes());
        };

        let mut payload = BytesMut::with_capacity(2 + self.reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(self.reason.as_bytes());
        payload.freeze()
    }
}

/// Represents a WebSocket frame.
///
/// **Note: This low-level struct should rarely be used directly.** Most users send and receive
/// complete messages through [`Connection`](crate::Connection).
///
/// A `Frame` is either produced by the decoder or assembled with a [`FrameBuilder`]. It cannot be
/// mutated afterwards, so a successful [`Frame::validate`] stays true for its lifetime.
///
/// The payload is always stored unmasked. For close frames the first two payload bytes hold the
/// big-endian status code and the remainder the UTF-8 reason; both are exposed through
/// [`Frame::close_code`] and [`Frame::close_reason`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: OpCode,
    masked: bool,
    payload: Bytes,
    close: Option<CloseBody>,
}

impl Frame {
    /// Creates a frame from decoded header fields and an unmasked payload.
    ///
    /// Close payloads are split into code and reason here. The close code policy is not
    /// applied; callers run [`Frame::validate`] before acting on the frame.
    pub(crate) fn decoded(
        fin: bool,
        rsv: u8,
        opcode: OpCode,
        masked: bool,
        payload: Bytes,
    ) -> Result<Self> {
        let close = if opcode == OpCode::Close {
            Some(CloseBody::parse(&payload)?)
        } else {
            None
        };

        Ok(Self {
            fin,
            rsv1: rsv & 0b100 != 0,
            rsv2: rsv & 0b010 != 0,
            rsv3: rsv & 0b001 != 0,
            opcode,
            masked,
            payload,
            close,
        })
    }

    /// Builds a valid close frame.
    pub fn close(code: impl Into<Option<CloseCode>>, reason: impl Into<String>) -> Result<Self> {
        FrameBuilder::close().code(code).reason(reason).build()
    }

    /// Indicates if this is the final frame in a message.
    #[inline]
    pub fn fin(&self) -> bool {
        self.fin
    }

    #[inline]
    pub fn rsv1(&self) -> bool {
        self.rsv1
    }

    #[inline]
    pub fn rsv2(&self) -> bool {
        self.rsv2
    }

    #[inline]
    pub fn rsv3(&self) -> bool {
        self.rsv3
    }

    #[inline]
    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Returns whether the frame was masked on the wire.
    ///
    /// Frames built locally report `false`; masking is decided by the encoder's role.
    #[inline]
    pub fn is_masked(&self) -> bool {
        self.masked
    }

    /// The unmasked payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The status code of a close frame, `None` for other frames or a close frame without code.
    pub fn close_code(&self) -> Option<CloseCode> {
        self.close.as_ref().and_then(|close| close.code)
    }

    /// The reason of a close frame, empty for other frames.
    pub fn close_reason(&self) -> &str {
        self.close
            .as_ref()
            .map(|close| close.reason.as_str())
            .unwrap_or_default()
    }

    /// Checks if the frame payload is valid UTF-8.
    #[inline(always)]
    pub fn is_utf8(&self) -> bool {
        crate::frame::is_utf8(&self.payload)
    }

    /// Checks the frame against the protocol rules.
    ///
    /// Close frames are checked in order: FIN set, reserved bits clear, close code policy
    /// ([`close::is_valid_to_send`]), then the control payload limit. Any failure is an
    /// [`WebSocketError::InvalidCloseFrame`]. Other frames fail with
    /// [`WebSocketError::InvalidFrame`].
    pub fn validate(&self) -> Result<()> {
        check(
            self.fin,
            [self.rsv1, self.rsv2, self.rsv3],
            self.opcode,
            self.payload.len(),
            self.close.as_ref(),
            Direction::Outbound,
        )
    }

    /// Checks a frame received from the peer.
    ///
    /// Same rules as [`Frame::validate`], except that a 1007 close frame may arrive without a
    /// reason.
    pub fn validate_received(&self) -> Result<()> {
        check(
            self.fin,
            [self.rsv1, self.rsv2, self.rsv3],
            self.opcode,
            self.payload.len(),
            self.close.as_ref(),
            Direction::Inbound,
        )
    }

    /// Formats the frame header into `head` and returns its size.
    ///
    /// When `mask` is given, the MASK bit is set and the key appended; the payload itself is
    /// masked by the encoder.
    ///
    /// # Panics
    /// Panics if `head` is shorter than [`MAX_HEAD_SIZE`].
    pub(crate) fn fmt_head(&self, head: &mut [u8], mask: Option<[u8; 4]>) -> usize {
        head[0] = (self.fin as u8) << 7
            | (self.rsv1 as u8) << 6
            | (self.rsv2 as u8) << 5
            | (self.rsv3 as u8) << 4
            | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len < 65536 {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        if let Some(mask) = mask {
            head[1] |= 0x80;
            head[size..size + 4].copy_from_slice(&mask);
            size + 4
        } else {
            size
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame{{ opcode:{:?}, fin:{}, rsv1:{}, rsv2:{}, rsv3:{}, payload length:{} }}",
            self.opcode,
            self.fin,
            self.rsv1,
            self.rsv2,
            self.rsv3,
            self.payload.len()
        )?;
        if let Some(code) = self.close_code() {
            write!(f, " code: {code}")?;
        }
        Ok(())
    }
}

/// Assembles a [`Frame`].
///
/// Setters consume and return the builder; [`FrameBuilder::build`] validates once and freezes
/// the result. [`FrameBuilder::validate`] runs the same checks without consuming the builder.
///
/// Close frames start with code [`CloseCode::Normal`] and an empty reason. Their payload is
/// always derived from code and reason, so [`FrameBuilder::payload`] has no effect on them.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    fin: bool,
    rsv1: bool,
    rsv2: bool,
    rsv3: bool,
    opcode: OpCode,
    payload: Bytes,
    code: Option<CloseCode>,
    reason: String,
}

impl FrameBuilder {
    /// Starts a final frame with an empty payload.
    pub fn new(opcode: OpCode) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload: Bytes::new(),
            code: (opcode == OpCode::Close).then_some(CloseCode::Normal),
            reason: String::new(),
        }
    }

    pub fn close() -> Self {
        Self::new(OpCode::Close)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(OpCode::Text).payload(text.into())
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary).payload(payload)
    }

    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Continuation).payload(payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping).payload(payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong).payload(payload)
    }

    pub fn fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn rsv1(mut self, rsv1: bool) -> Self {
        self.rsv1 = rsv1;
        self
    }

    pub fn rsv2(mut self, rsv2: bool) -> Self {
        self.rsv2 = rsv2;
        self
    }

    pub fn rsv3(mut self, rsv3: bool) -> Self {
        self.rsv3 = rsv3;
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets the close code; `None` builds a close frame without status code.
    pub fn code(mut self, code: impl Into<Option<CloseCode>>) -> Self {
        self.code = code.into();
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Length of the payload the built frame will carry.
    pub fn payload_len(&self) -> usize {
        match (self.opcode, self.code) {
            (OpCode::Close, Some(_)) => 2 + self.reason.len(),
            (OpCode::Close, None) => self.reason.len(),
            _ => self.payload.len(),
        }
    }

    fn close_body(&self) -> Option<CloseBody> {
        (self.opcode == OpCode::Close).then(|| CloseBody {
            code: self.code,
            reason: self.reason.clone(),
        })
    }

    /// Checks the frame that [`FrameBuilder::build`] would produce.
    pub fn validate(&self) -> Result<()> {
        check(
            self.fin,
            [self.rsv1, self.rsv2, self.rsv3],
            self.opcode,
            self.payload_len(),
            self.close_body().as_ref(),
            Direction::Outbound,
        )
    }

    /// Validates and freezes the frame.
    pub fn build(self) -> Result<Frame> {
        self.validate()?;

        let close = self.close_body();
        let payload = match &close {
            Some(close) => close.encode(),
            None => self.payload,
        };

        Ok(Frame {
            fin: self.fin,
            rsv1: self.rsv1,
            rsv2: self.rsv2,
            rsv3: self.rsv3,
            opcode: self.opcode,
            masked: false,
            payload,
            close,
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

fn check(
    fin: bool,
    rsv: [bool; 3],
    opcode: OpCode,
    payload_len: usize,
    close: Option<&CloseBody>,
    direction: Direction,
) -> Result<()> {
    let rsv_set = rsv.iter().any(|bit| *bit);

    if let Some(close) = close {
        if !fin {
            return Err(CloseFrameError::NotFinal.into());
        }
        if rsv_set {
            return Err(CloseFrameError::ReservedBitsSet.into());
        }
        match close.code.map(u16::from) {
            Some(code) => match close::classify(code) {
                Classification::Normal => {}
                Classification::RequiresReason
                    if close.reason.is_empty() && direction == Direction::Outbound =>
                {
                    return Err(CloseFrameError::MissingReason(code).into())
                }
                Classification::RequiresReason => {}
                _ => return Err(CloseFrameError::CodeNotSendable(code).into()),
            },
            None if !close.reason.is_empty() => {
                return Err(CloseFrameError::ReasonWithoutCode.into())
            }
            None => {}
        }
        if payload_len > MAX_CONTROL_PAYLOAD {
            return Err(CloseFrameError::ReasonTooLong(close.reason.len()).into());
        }
        return Ok(());
    }

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::ControlFrameFragmented.into());
        }
        if payload_len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlFrameTooLarge(payload_len).into());
        }
    }
    if rsv_set {
        return Err(FrameError::ReservedBitsNotZero.into());
    }

    Ok(())
}

/// UTF-8 check shared by text messages and close reasons.
#[inline(always)]
pub(crate) fn is_utf8(payload: &[u8]) -> bool {
    #[cfg(not(feature = "simd"))]
    return std::str::from_utf8(payload).is_ok();
    #[cfg(feature = "simd")]
    return simdutf8::basic::from_utf8(payload).is_ok();
}
