//! # Codec
//!
//! Conversion between [`Frame`]s and their RFC 6455 wire representation.
//!
//! [`decode_frame`] and [`encode_frame`] are pure functions over in-memory buffers. A decode that
//! runs out of bytes fails with [`WebSocketError::IncompleteFrame`], which tells the caller how
//! many more bytes to wait for; nothing in this module blocks.
//!
//! [`Decoder`] and [`Encoder`] wrap them as `tokio_util` codecs and dispatch through the
//! negotiated [`Draft`], so the legacy sentinel framing shares the same read and write paths.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    draft::Draft,
    frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD, MAX_HEAD_SIZE},
    mask, FrameError, Result, Role, WebSocketError,
};

/// Header fields preceding the payload.
struct Header {
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    /// Bytes taken by the header, including extended length and masking key.
    size: usize,
    payload_len: usize,
}

/// Decodes one frame from the start of `src`.
///
/// `role` is the role of the receiving endpoint: a server requires masked frames, a client
/// rejects them. Payloads larger than `max_payload_read` fail with
/// [`WebSocketError::FrameTooLarge`] before any payload byte is buffered.
///
/// Returns the frame with its payload unmasked, together with the number of bytes consumed.
pub fn decode_frame(src: &[u8], role: Role, max_payload_read: usize) -> Result<(Frame, usize)> {
    let header = parse_header(src, role, max_payload_read)?;

    let total = header.size + header.payload_len;
    if src.len() < total {
        return Err(WebSocketError::IncompleteFrame {
            needed: total - src.len(),
        });
    }

    let mut payload = BytesMut::from(&src[header.size..total]);
    if let Some(key) = header.mask {
        mask::apply_mask(&mut payload, key);
    }

    let frame = Frame::decoded(
        header.fin,
        0,
        header.opcode,
        header.mask.is_some(),
        payload.freeze(),
    )?;

    Ok((frame, total))
}

fn parse_header(src: &[u8], role: Role, max_payload_read: usize) -> Result<Header> {
    if src.len() < 2 {
        return Err(WebSocketError::IncompleteFrame {
            needed: 2 - src.len(),
        });
    }

    let fin = src[0] & 0b10000000 != 0;
    if src[0] & 0b01110000 != 0 {
        return Err(FrameError::ReservedBitsNotZero.into());
    }

    let opcode = OpCode::try_from(src[0] & 0b00001111)?;
    let masked = src[1] & 0b10000000 != 0;
    match (role, masked) {
        (Role::Server, false) => return Err(FrameError::MissingMask.into()),
        (Role::Client, true) => return Err(FrameError::UnexpectedMask.into()),
        _ => {}
    }

    let length_code = src[1] & 0x7F;
    let extra = match length_code {
        126 => 2,
        127 => 8,
        _ => 0,
    };
    let size = 2 + extra + masked as usize * 4;
    if src.len() < size {
        return Err(WebSocketError::IncompleteFrame {
            needed: size - src.len(),
        });
    }

    let payload_len = match extra {
        0 => u64::from(length_code),
        2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
        _ => {
            let mut length = [0u8; 8];
            length.copy_from_slice(&src[2..10]);
            let length = u64::from_be_bytes(length);
            // the most significant bit must be 0
            if length >> 63 != 0 {
                return Err(FrameError::InvalidPayloadLength.into());
            }
            length
        }
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::ControlFrameFragmented.into());
        }
        if payload_len > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlFrameTooLarge(
                usize::try_from(payload_len).unwrap_or(usize::MAX),
            )
            .into());
        }
    }

    let payload_len = match usize::try_from(payload_len) {
        Ok(length) if length <= max_payload_read => length,
        _ => return Err(WebSocketError::FrameTooLarge),
    };

    let mask = masked.then(|| {
        let at = 2 + extra;
        [src[at], src[at + 1], src[at + 2], src[at + 3]]
    });

    Ok(Header {
        fin,
        opcode,
        mask,
        size,
        payload_len,
    })
}

/// Writes `frame` to `dst` using the shortest length encoding.
///
/// With a `mask` key the MASK bit is set and the payload is masked on the way out; the frame
/// itself is left untouched.
pub fn encode_frame(frame: &Frame, mask: Option<[u8; 4]>, dst: &mut BytesMut) {
    let mut head = [0; MAX_HEAD_SIZE];
    let size = frame.fmt_head(&mut head, mask);

    dst.reserve(size + frame.payload().len());
    dst.extend_from_slice(&head[..size]);

    let start = dst.len();
    dst.extend_from_slice(frame.payload());
    if let Some(key) = mask {
        mask::apply_mask(&mut dst[start..], key);
    }
}

/// Encodes `frame` as sent by `role`: clients mask with a fresh key, servers never mask.
pub fn encode(frame: &Frame, role: Role, dst: &mut BytesMut) -> Result<()> {
    let key = match role {
        Role::Client => Some(mask::generate_key()),
        Role::Server => None,
    };
    encode_frame(frame, key, dst);
    Ok(())
}

/// Streaming frame decoder for one connection.
///
/// Bytes of a partially received frame stay in the source buffer until the whole frame is
/// available.
pub struct Decoder {
    role: Role,
    draft: Draft,
    /// Maximum allowed size for the frame payload.
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a decoder for frames received by `role`, limiting payloads to `max_payload_size`.
    pub fn new(role: Role, draft: Draft, max_payload_size: usize) -> Self {
        Self {
            role,
            draft,
            max_payload_size,
        }
    }

    /// The draft frames are decoded with.
    pub fn draft(&self) -> Draft {
        self.draft
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Decodes the next frame, returning `Ok(None)` while the frame is incomplete.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decode = self.draft.ops().decode;
        match decode(src, self.role, self.max_payload_size) {
            Ok((frame, consumed)) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(WebSocketError::IncompleteFrame { needed }) => {
                src.reserve(needed);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Frame encoder for one connection.
pub struct Encoder {
    role: Role,
    draft: Draft,
}

impl Encoder {
    /// Creates an encoder for frames sent by `role`.
    pub fn new(role: Role, draft: Draft) -> Self {
        Self { role, draft }
    }

    /// The draft frames are encoded with.
    pub fn draft(&self) -> Draft {
        self.draft
    }
}

impl codec::Encoder<Frame> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        let encode = self.draft.ops().encode;
        encode(&frame, self.role, dst)
    }
}
