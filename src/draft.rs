//! # Drafts
//!
//! Protocol variants a connection can speak. Each [`Draft`] maps to a static [`DraftOps`] table
//! holding its handshake rules, its wire codec and its [`FrameLimits`].
//!
//! - [`Draft::Rfc6455`]: the standard protocol.
//! - [`Draft::LegacyHixie`]: the pre-standard hixie-75 protocol. Its handshake has no key and
//!   its framing delimits UTF-8 text between `0x00` and `0xFF`; a close is `0xFF 0x00` and
//!   carries no status code. Binary messages, fragmentation and ping/pong do not exist in it.
use bytes::{BufMut, Bytes, BytesMut};
use http::{header, HeaderName, Method, StatusCode, Version};
use url::Url;

use crate::{
    codec,
    frame::{Frame, OpCode},
    handshake::{self, ClientHandshake, HttpRequest, HttpResponse, Negotiation},
    FrameError, HandshakeError, Options, Result, Role, WebSocketError,
};

/// Protocol variant negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Draft {
    Rfc6455,
    LegacyHixie,
}

impl std::fmt::Display for Draft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rfc6455 => write!(f, "RFC 6455"),
            Self::LegacyHixie => write!(f, "hixie-75"),
        }
    }
}

/// Frame features a draft can carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub binary: bool,
    pub ping_pong: bool,
    pub fragmentation: bool,
}

impl FrameLimits {
    /// Returns whether a frame with `opcode` and `fin` can be sent.
    pub fn allows(&self, opcode: OpCode, fin: bool) -> bool {
        let fragment_ok = self.fragmentation || (fin && opcode != OpCode::Continuation);
        let opcode_ok = match opcode {
            OpCode::Binary => self.binary,
            OpCode::Ping | OpCode::Pong => self.ping_pong,
            _ => true,
        };
        fragment_ok && opcode_ok
    }
}

/// Behavior table of a draft.
pub struct DraftOps {
    /// Predicate deciding whether an opening request is meant for this draft.
    pub accept_handshake: fn(&HttpRequest) -> bool,
    pub build_request: fn(&Url, &Options) -> Result<ClientHandshake>,
    pub build_response: fn(&HttpRequest, &Options) -> Result<(HttpResponse, Negotiation)>,
    pub verify_response: fn(&ClientHandshake, &HttpResponse, &Options) -> Result<Negotiation>,
    /// Decodes one frame, see [`codec::decode_frame`].
    pub decode: fn(&[u8], Role, usize) -> Result<(Frame, usize)>,
    pub encode: fn(&Frame, Role, &mut BytesMut) -> Result<()>,
    /// Reason phrase of the `101` response.
    pub status_reason: &'static str,
    pub limits: FrameLimits,
}

static RFC6455: DraftOps = DraftOps {
    accept_handshake: handshake::rfc6455_accepts,
    build_request: handshake::rfc6455_build_request,
    build_response: handshake::rfc6455_build_response,
    verify_response: handshake::rfc6455_verify,
    decode: codec::decode_frame,
    encode: codec::encode,
    status_reason: "Switching Protocols",
    limits: FrameLimits {
        binary: true,
        ping_pong: true,
        fragmentation: true,
    },
};

static LEGACY_HIXIE: DraftOps = DraftOps {
    accept_handshake: legacy_accepts,
    build_request: legacy_build_request,
    build_response: legacy_build_response,
    verify_response: legacy_verify,
    decode: legacy_decode,
    encode: legacy_encode,
    status_reason: "Web Socket Protocol Handshake",
    limits: FrameLimits {
        binary: false,
        ping_pong: false,
        fragmentation: false,
    },
};

impl Draft {
    pub fn ops(self) -> &'static DraftOps {
        match self {
            Self::Rfc6455 => &RFC6455,
            Self::LegacyHixie => &LEGACY_HIXIE,
        }
    }

    pub fn limits(self) -> FrameLimits {
        self.ops().limits
    }
}

const WEBSOCKET_ORIGIN: HeaderName = HeaderName::from_static("websocket-origin");
const WEBSOCKET_LOCATION: HeaderName = HeaderName::from_static("websocket-location");
const WEBSOCKET_PROTOCOL: HeaderName = HeaderName::from_static("websocket-protocol");

fn legacy_accepts(request: &HttpRequest) -> bool {
    let headers = request.headers();
    !headers.contains_key(header::SEC_WEBSOCKET_KEY)
        && !headers.contains_key(header::SEC_WEBSOCKET_VERSION)
        && handshake::has_token(headers, header::UPGRADE, "websocket")
        && headers.contains_key(header::ORIGIN)
}

fn legacy_build_request(url: &Url, options: &Options) -> Result<ClientHandshake> {
    let host = handshake::host(url)?;

    let mut builder = http::Request::builder()
        .method(Method::GET)
        .uri(handshake::resource(url))
        .version(Version::HTTP_11)
        .header(header::UPGRADE, "WebSocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::HOST, host.as_str())
        .header(header::ORIGIN, format!("http://{host}"));
    if let Some(protocol) = options.protocols.first() {
        builder = builder.header(WEBSOCKET_PROTOCOL, protocol.as_str());
    }

    let request = builder.body(()).map_err(|_| HandshakeError::Malformed)?;

    Ok(ClientHandshake {
        draft: Draft::LegacyHixie,
        key: None,
        request,
    })
}

fn legacy_build_response(
    request: &HttpRequest,
    options: &Options,
) -> Result<(HttpResponse, Negotiation)> {
    if request.method() != Method::GET {
        return Err(HandshakeError::InvalidMethod(request.method().to_string()).into());
    }

    let headers = request.headers();
    if !handshake::has_token(headers, header::CONNECTION, "upgrade") {
        return Err(HandshakeError::InvalidConnectionHeader.into());
    }
    let host = headers
        .get(header::HOST)
        .ok_or(HandshakeError::MissingHeader("Host"))?;
    let origin = headers
        .get(header::ORIGIN)
        .ok_or(HandshakeError::MissingHeader("Origin"))?;

    let resource = handshake::target(request);
    let location = format!(
        "ws://{}{resource}",
        host.to_str().map_err(|_| HandshakeError::Malformed)?
    );

    let offered: Vec<&str> = headers
        .get(WEBSOCKET_PROTOCOL)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .into_iter()
        .collect();
    let protocol = handshake::select_protocol(&offered, &options.protocols);

    let mut builder = http::Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "WebSocket")
        .header(header::CONNECTION, "Upgrade")
        .header(WEBSOCKET_ORIGIN, origin.clone())
        .header(WEBSOCKET_LOCATION, location);
    if let Some(protocol) = &protocol {
        builder = builder.header(WEBSOCKET_PROTOCOL, protocol.as_str());
    }
    let response = builder.body(()).map_err(|_| HandshakeError::Malformed)?;

    let negotiation = Negotiation {
        draft: Draft::LegacyHixie,
        protocol,
        offered_extensions: Vec::new(),
        resource,
        headers: headers.clone(),
    };

    Ok((response, negotiation))
}

fn legacy_verify(
    handshake: &ClientHandshake,
    response: &HttpResponse,
    options: &Options,
) -> Result<Negotiation> {
    handshake::verify_upgrade(response)?;

    let headers = response.headers();
    if !headers.contains_key(WEBSOCKET_ORIGIN) {
        return Err(HandshakeError::MissingHeader("WebSocket-Origin").into());
    }
    if !headers.contains_key(WEBSOCKET_LOCATION) {
        return Err(HandshakeError::MissingHeader("WebSocket-Location").into());
    }

    let protocol = handshake::verify_protocol(headers, WEBSOCKET_PROTOCOL, options)?;

    Ok(Negotiation {
        draft: Draft::LegacyHixie,
        protocol,
        offered_extensions: Vec::new(),
        resource: handshake::target(&handshake.request),
        headers: headers.clone(),
    })
}

/// Decodes one sentinel frame. Masking does not exist in this draft, so `role` is unused.
fn legacy_decode(src: &[u8], _role: Role, max_payload_read: usize) -> Result<(Frame, usize)> {
    let Some(&kind) = src.first() else {
        return Err(WebSocketError::IncompleteFrame { needed: 1 });
    };

    match kind {
        0x00 => match src[1..].iter().position(|b| *b == 0xFF) {
            Some(len) if len > max_payload_read => Err(WebSocketError::FrameTooLarge),
            Some(len) => {
                let payload = Bytes::copy_from_slice(&src[1..1 + len]);
                let frame = Frame::decoded(true, 0, OpCode::Text, false, payload)?;
                Ok((frame, len + 2))
            }
            None if src.len() - 1 > max_payload_read => Err(WebSocketError::FrameTooLarge),
            None => Err(WebSocketError::IncompleteFrame { needed: 1 }),
        },
        0xFF => match src.get(1) {
            None => Err(WebSocketError::IncompleteFrame { needed: 1 }),
            Some(0x00) => {
                let frame = Frame::decoded(true, 0, OpCode::Close, false, Bytes::new())?;
                Ok((frame, 2))
            }
            Some(_) => Err(FrameError::MalformedLegacyFrame(kind).into()),
        },
        _ => Err(FrameError::MalformedLegacyFrame(kind).into()),
    }
}

fn legacy_encode(frame: &Frame, _role: Role, dst: &mut BytesMut) -> Result<()> {
    match frame.opcode() {
        OpCode::Text if frame.fin() => {
            if frame.payload().contains(&0xFF) {
                return Err(FrameError::MalformedLegacyFrame(0xFF).into());
            }
            dst.reserve(frame.payload().len() + 2);
            dst.put_u8(0x00);
            dst.put_slice(frame.payload());
            dst.put_u8(0xFF);
            Ok(())
        }
        OpCode::Close => {
            dst.put_slice(&[0xFF, 0x00]);
            Ok(())
        }
        _ => Err(WebSocketError::UnsupportedByDraft(Draft::LegacyHixie)),
    }
}
