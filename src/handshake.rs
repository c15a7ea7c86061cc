//! # Opening handshake
//!
//! HTTP/1.1 upgrade exchange that precedes framing
//! ([RFC 6455 Section 4](https://datatracker.ietf.org/doc/html/rfc6455#section-4)).
//!
//! The module parses and writes the HTTP heads itself, so it never needs an HTTP stack:
//! - [`parse_request`] / [`parse_response`] read a head from a byte buffer, returning `Ok(None)`
//!   until the terminating blank line arrived.
//! - [`ClientHandshake`] builds the client request and verifies the server's answer.
//! - [`accept`] selects a [`Draft`] for an incoming request and builds the response.
//!
//! Draft specific rules live behind [`Draft::ops`]; this module holds the RFC 6455 ones.
//!
//! ```rust
//! use wscore::handshake::accept_key;
//!
//! // sample nonce from RFC 6455 section 1.3
//! assert_eq!(accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzxo4wP99Tes=");
//! ```
use base64::prelude::*;
use bytes::{BufMut, BytesMut};
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version};
use nom::{
    bytes::complete::{tag, take_till, take_while1, take_while_m_n},
    character::complete::{crlf, space0},
    combinator::{all_consuming, opt},
    multi::{many0, many0_count, separated_list1},
    sequence::{preceded, terminated},
    IResult, Parser,
};
use sha1::{Digest, Sha1};
use url::Url;

use crate::{draft::Draft, HandshakeError, Options, Result, WebSocketError};

/// Head of an opening request. The body is never used.
pub type HttpRequest = http::Request<()>;

/// Head of an opening response.
pub type HttpResponse = http::Response<()>;

const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Result of a successful opening handshake.
#[derive(Debug, Clone)]
pub struct Negotiation {
    /// The draft both sides agreed on.
    pub draft: Draft,
    /// The selected subprotocol, if any.
    pub protocol: Option<String>,
    /// Extension names offered by the client. None of them is ever accepted, so the reserved
    /// frame bits stay invalid.
    pub offered_extensions: Vec<String>,
    /// Request target (path and query).
    pub resource: String,
    /// Headers received from the peer.
    pub headers: HeaderMap,
}

impl Negotiation {
    /// A negotiation with no subprotocol, for connections whose handshake happened elsewhere.
    pub fn new(draft: Draft) -> Self {
        Self {
            draft,
            protocol: None,
            offered_extensions: Vec::new(),
            resource: "/".to_owned(),
            headers: HeaderMap::new(),
        }
    }
}

/// Generates a random `Sec-WebSocket-Key`: 16 random bytes, base64 encoded.
pub fn generate_key() -> String {
    let input: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(input)
}

/// Derives the `Sec-WebSocket-Accept` value for a request key.
pub fn accept_key(key: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WEBSOCKET_GUID);
    let result = sha1.finalize();
    BASE64_STANDARD.encode(&result[..])
}

/// Client side of the opening handshake.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    pub(crate) draft: Draft,
    /// `Sec-WebSocket-Key` sent with the request, absent for the legacy draft.
    pub(crate) key: Option<String>,
    pub(crate) request: HttpRequest,
}

impl ClientHandshake {
    /// Builds the opening request for `url` using the first draft of `options`.
    pub fn new(url: &Url, options: &Options) -> Result<Self> {
        let draft = options.client_draft();
        let handshake = (draft.ops().build_request)(url, options)?;

        #[cfg(feature = "logging")]
        log::debug!("{draft} handshake request for {url}");

        Ok(handshake)
    }

    pub fn draft(&self) -> Draft {
        self.draft
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// The serialized request head.
    pub fn to_bytes(&self) -> BytesMut {
        let mut dst = BytesMut::with_capacity(256);
        write_request(&self.request, &mut dst);
        dst
    }

    /// Checks the server response against the request.
    pub fn verify(&self, response: &HttpResponse, options: &Options) -> Result<Negotiation> {
        (self.draft.ops().verify_response)(self, response, options)
    }
}

/// Selects the first draft, in preference order, whose predicate accepts `request`.
pub fn select_draft(request: &HttpRequest, drafts: &[Draft]) -> Result<Draft> {
    drafts
        .iter()
        .copied()
        .find(|draft| (draft.ops().accept_handshake)(request))
        .ok_or(WebSocketError::NoMatchingDraft)
}

/// Server side of the opening handshake: selects a draft and builds the response.
pub fn accept(request: &HttpRequest, options: &Options) -> Result<(HttpResponse, Negotiation)> {
    let draft = select_draft(request, &options.drafts)?;

    #[cfg(feature = "logging")]
    log::debug!("selected {draft} for {}", request.uri());

    (draft.ops().build_response)(request, options)
}

pub(crate) fn rfc6455_accepts(request: &HttpRequest) -> bool {
    let headers = request.headers();
    headers.contains_key(header::SEC_WEBSOCKET_KEY)
        || headers.contains_key(header::SEC_WEBSOCKET_VERSION)
}

pub(crate) fn rfc6455_build_request(url: &Url, options: &Options) -> Result<ClientHandshake> {
    let key = generate_key();

    let mut builder = http::Request::builder()
        .method(Method::GET)
        .uri(resource(url))
        .version(Version::HTTP_11)
        .header(header::HOST, host(url)?)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_KEY, key.as_str())
        .header(header::SEC_WEBSOCKET_VERSION, "13");

    if !options.protocols.is_empty() {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, options.protocols.join(", "));
    }

    let request = builder.body(()).map_err(|_| HandshakeError::Malformed)?;

    Ok(ClientHandshake {
        draft: Draft::Rfc6455,
        key: Some(key),
        request,
    })
}

pub(crate) fn rfc6455_build_response(
    request: &HttpRequest,
    options: &Options,
) -> Result<(HttpResponse, Negotiation)> {
    if request.method() != Method::GET {
        return Err(HandshakeError::InvalidMethod(request.method().to_string()).into());
    }

    let headers = request.headers();
    if !has_token(headers, header::UPGRADE, "websocket") {
        return Err(HandshakeError::InvalidUpgradeHeader.into());
    }
    if !has_token(headers, header::CONNECTION, "upgrade") {
        return Err(HandshakeError::InvalidConnectionHeader.into());
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(HandshakeError::MissingSecWebSocketKey)?;
    match BASE64_STANDARD.decode(key.as_bytes()) {
        Ok(nonce) if nonce.len() == 16 => {}
        _ => return Err(HandshakeError::InvalidSecWebSocketKey.into()),
    }

    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        != Some(b"13")
    {
        return Err(HandshakeError::InvalidSecWebsocketVersion.into());
    }

    let offered = header_list(headers, header::SEC_WEBSOCKET_PROTOCOL, protocol_list)?;
    let protocol = select_protocol(&offered, &options.protocols);
    let offered_extensions = header_list(headers, header::SEC_WEBSOCKET_EXTENSIONS, extension_list)?
        .into_iter()
        .map(str::to_owned)
        .collect();

    let mut builder = http::Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept_key(key.as_bytes()));
    if let Some(protocol) = &protocol {
        builder = builder.header(header::SEC_WEBSOCKET_PROTOCOL, protocol.as_str());
    }
    let response = builder.body(()).map_err(|_| HandshakeError::Malformed)?;

    let negotiation = Negotiation {
        draft: Draft::Rfc6455,
        protocol,
        offered_extensions,
        resource: target(request),
        headers: headers.clone(),
    };

    Ok((response, negotiation))
}

pub(crate) fn rfc6455_verify(
    handshake: &ClientHandshake,
    response: &HttpResponse,
    options: &Options,
) -> Result<Negotiation> {
    verify_upgrade(response)?;

    let headers = response.headers();
    let expected = handshake
        .key
        .as_deref()
        .map(|key| accept_key(key.as_bytes()));
    let accept = headers
        .get(header::SEC_WEBSOCKET_ACCEPT)
        .and_then(|h| h.to_str().ok());
    if expected.is_none() || accept != expected.as_deref() {
        return Err(HandshakeError::AcceptMismatch.into());
    }

    if let Some(name) = header_list(headers, header::SEC_WEBSOCKET_EXTENSIONS, extension_list)?
        .into_iter()
        .next()
    {
        return Err(HandshakeError::UnsolicitedExtension(name.to_owned()).into());
    }

    let protocol = verify_protocol(headers, header::SEC_WEBSOCKET_PROTOCOL, options)?;

    Ok(Negotiation {
        draft: Draft::Rfc6455,
        protocol,
        offered_extensions: Vec::new(),
        resource: target(&handshake.request),
        headers: headers.clone(),
    })
}

/// Checks the status line and the `Upgrade` and `Connection` headers of a response.
pub(crate) fn verify_upgrade(response: &HttpResponse) -> Result<()> {
    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        return Err(HandshakeError::InvalidStatusCode(response.status().as_u16()).into());
    }

    let headers = response.headers();
    if !has_token(headers, header::UPGRADE, "websocket") {
        return Err(HandshakeError::InvalidUpgradeHeader.into());
    }
    if !has_token(headers, header::CONNECTION, "upgrade") {
        return Err(HandshakeError::InvalidConnectionHeader.into());
    }

    Ok(())
}

/// Returns the protocol selected by the server, rejecting one the client did not offer.
pub(crate) fn verify_protocol(
    headers: &HeaderMap,
    name: HeaderName,
    options: &Options,
) -> Result<Option<String>> {
    let Some(selected) = headers.get(name).and_then(|h| h.to_str().ok()) else {
        return Ok(None);
    };

    let selected = selected.trim();
    if options.protocols.iter().any(|offered| offered == selected) {
        Ok(Some(selected.to_owned()))
    } else {
        Err(HandshakeError::UnsolicitedProtocol(selected.to_owned()).into())
    }
}

/// First protocol offered by the client that the server supports.
pub(crate) fn select_protocol(offered: &[&str], supported: &[String]) -> Option<String> {
    offered
        .iter()
        .find(|name| supported.iter().any(|supported| supported == *name))
        .map(|name| (*name).to_owned())
}

/// Returns whether a comma separated header contains `token`, ignoring case.
pub(crate) fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Host header value for `url`: the host, plus the port when it is explicit.
pub(crate) fn host(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or(WebSocketError::UrlParseError(url::ParseError::EmptyHost))?;

    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Request target for `url`: path and query.
pub(crate) fn resource(url: &Url) -> &str {
    &url[url::Position::BeforePath..url::Position::AfterQuery]
}

pub(crate) fn target(request: &HttpRequest) -> String {
    request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/")
        .to_owned()
}

/// Collects the elements of every `name` header, parsed with `parser`.
fn header_list<'a>(
    headers: &'a HeaderMap,
    name: HeaderName,
    parser: fn(&str) -> IResult<&str, Vec<&str>>,
) -> Result<Vec<&'a str>> {
    let mut elements = Vec::new();
    for value in headers.get_all(name) {
        let value = value.to_str().map_err(|_| HandshakeError::Malformed)?;
        if value.trim().is_empty() {
            continue;
        }
        let (_, list) = parser(value).map_err(|_| HandshakeError::Malformed)?;
        elements.extend(list);
    }
    Ok(elements)
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

/// Parses a `Sec-WebSocket-Protocol` value: `token *( "," token )`.
pub fn protocol_list(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(terminated(
        separated_list1(
            (space0, tag(","), space0),
            preceded(space0, take_while1(is_token_char)),
        ),
        space0,
    ))
    .parse(input)
}

/// Parses a `Sec-WebSocket-Extensions` value into extension names, skipping parameters.
///
/// ```rust
/// use wscore::handshake::extension_list;
///
/// let (_, names) =
///     extension_list("permessage-deflate; client_max_window_bits, x-foo").unwrap();
/// assert_eq!(names, ["permessage-deflate", "x-foo"]);
/// ```
pub fn extension_list(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(terminated(
        separated_list1((space0, tag(",")), extension),
        space0,
    ))
    .parse(input)
}

fn extension(input: &str) -> IResult<&str, &str> {
    terminated(
        preceded(space0, take_while1(is_token_char)),
        many0_count((space0, tag(";"), take_till(|c: char| c == ',' || c == ';'))),
    )
    .parse(input)
}

/// Finds the end of an HTTP head in `src`.
fn head_len(src: &[u8], max_size: usize) -> Result<Option<usize>> {
    match src.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) if pos + 4 <= max_size => Ok(Some(pos + 4)),
        Some(_) => Err(HandshakeError::HeadTooLarge(max_size).into()),
        None if src.len() > max_size => Err(HandshakeError::HeadTooLarge(max_size).into()),
        None => Ok(None),
    }
}

fn is_tchar(c: u8) -> bool {
    is_token_char(char::from(c))
}

fn http_version(input: &[u8]) -> IResult<&[u8], &[u8]> {
    preceded(
        tag("HTTP/"),
        take_while1(|c: u8| c.is_ascii_digit() || c == b'.'),
    )
    .parse(input)
}

fn request_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8], &[u8])> {
    (
        terminated(take_while1(is_tchar), tag(" ")),
        terminated(take_while1(|c: u8| c != b' ' && c != b'\r'), tag(" ")),
        terminated(http_version, crlf),
    )
        .parse(input)
}

fn status_line(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    (
        terminated(http_version, tag(" ")),
        terminated(
            take_while_m_n(3, 3, |c: u8| c.is_ascii_digit()),
            (opt(preceded(tag(" "), take_till(|c: u8| c == b'\r'))), crlf),
        ),
    )
        .parse(input)
}

fn header_field(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    (
        terminated(take_while1(is_tchar), (tag(":"), space0)),
        terminated(take_till(|c: u8| c == b'\r' || c == b'\n'), crlf),
    )
        .parse(input)
}

fn header_fields(input: &[u8]) -> IResult<&[u8], Vec<(&[u8], &[u8])>> {
    terminated(many0(header_field), crlf).parse(input)
}

fn trim_value(value: &[u8]) -> &[u8] {
    let end = value
        .iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map_or(0, |pos| pos + 1);
    &value[..end]
}

fn to_version(version: &[u8]) -> Result<Version> {
    match version {
        b"1.1" => Ok(Version::HTTP_11),
        b"1.0" => Ok(Version::HTTP_10),
        _ => Err(HandshakeError::Malformed.into()),
    }
}

fn insert_headers(target: &mut HeaderMap, fields: Vec<(&[u8], &[u8])>) -> Result<()> {
    for (name, value) in fields {
        let name = HeaderName::from_bytes(name).map_err(|_| HandshakeError::Malformed)?;
        let value =
            HeaderValue::from_bytes(trim_value(value)).map_err(|_| HandshakeError::Malformed)?;
        target.append(name, value);
    }
    Ok(())
}

/// Parses a request head from the start of `src`.
///
/// Returns `Ok(None)` while the blank line ending the head has not arrived, and the request with
/// the number of bytes consumed otherwise. Bytes past the head are left for the frame decoder.
pub fn parse_request(src: &[u8], max_size: usize) -> Result<Option<(HttpRequest, usize)>> {
    let Some(len) = head_len(src, max_size)? else {
        return Ok(None);
    };

    let ((method, uri, version), fields) = (request_line, header_fields)
        .parse(&src[..len])
        .map(|(_, parsed)| parsed)
        .map_err(|_| HandshakeError::Malformed)?;

    let mut request = http::Request::builder()
        .method(method)
        .uri(uri)
        .version(to_version(version)?)
        .body(())
        .map_err(|_| HandshakeError::Malformed)?;
    insert_headers(request.headers_mut(), fields)?;

    Ok(Some((request, len)))
}

/// Parses a response head from the start of `src`. See [`parse_request`].
pub fn parse_response(src: &[u8], max_size: usize) -> Result<Option<(HttpResponse, usize)>> {
    let Some(len) = head_len(src, max_size)? else {
        return Ok(None);
    };

    let ((version, status), fields) = (status_line, header_fields)
        .parse(&src[..len])
        .map(|(_, parsed)| parsed)
        .map_err(|_| HandshakeError::Malformed)?;

    let status = StatusCode::from_bytes(status).map_err(|_| HandshakeError::Malformed)?;
    let mut response = http::Response::builder()
        .status(status)
        .version(to_version(version)?)
        .body(())
        .map_err(|_| HandshakeError::Malformed)?;
    insert_headers(response.headers_mut(), fields)?;

    Ok(Some((response, len)))
}

fn write_headers(headers: &HeaderMap, dst: &mut BytesMut) {
    for (name, value) in headers {
        dst.put_slice(name.as_str().as_bytes());
        dst.put_slice(b": ");
        dst.put_slice(value.as_bytes());
        dst.put_slice(b"\r\n");
    }
    dst.put_slice(b"\r\n");
}

/// Writes a request head.
pub fn write_request(request: &HttpRequest, dst: &mut BytesMut) {
    let target = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    dst.put_slice(format!("{} {target} HTTP/1.1\r\n", request.method()).as_bytes());
    write_headers(request.headers(), dst);
}

/// Writes a response head with the given reason phrase.
pub fn write_response(response: &HttpResponse, reason: &str, dst: &mut BytesMut) {
    dst.put_slice(format!("HTTP/1.1 {} {reason}\r\n", response.status().as_u16()).as_bytes());
    write_headers(response.headers(), dst);
}

/// Writes the `400 Bad Request` sent when a server rejects an opening request.
pub(crate) fn write_rejection(err: &WebSocketError, dst: &mut BytesMut) {
    dst.put_slice(b"HTTP/1.1 400 Bad Request\r\n");
    if matches!(
        err,
        WebSocketError::InvalidHandshake(HandshakeError::InvalidSecWebsocketVersion)
    ) {
        dst.put_slice(b"sec-websocket-version: 13\r\n");
    }
    dst.put_slice(b"connection: close\r\ncontent-length: 0\r\n\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = crate::options::MAX_HANDSHAKE_SIZE;

    const SAMPLE_REQUEST: &[u8] = b"GET /chat?room=1 HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Origin: http://example.com\r\n\
        Sec-WebSocket-Protocol: chat, superchat\r\n\
        Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    fn request(src: &[u8]) -> HttpRequest {
        parse_request(src, MAX).unwrap().unwrap().0
    }

    fn response_for(handshake: &ClientHandshake, extra: &str) -> HttpResponse {
        let key = handshake.key.as_deref().unwrap();
        let head = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n{extra}\r\n",
            accept_key(key.as_bytes())
        );
        parse_response(head.as_bytes(), MAX).unwrap().unwrap().0
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_parse_request() {
            let mut src = SAMPLE_REQUEST.to_vec();
            src.extend_from_slice(&[0x81, 0x80]);

            let (request, consumed) = parse_request(&src, MAX).unwrap().unwrap();
            assert_eq!(consumed, SAMPLE_REQUEST.len());
            assert_eq!(request.method(), Method::GET);
            assert_eq!(request.uri().path(), "/chat");
            assert_eq!(target(&request), "/chat?room=1");
            assert_eq!(
                request.headers().get(header::CONNECTION).unwrap(),
                "keep-alive, Upgrade"
            );
        }

        #[test]
        fn test_partial_head() {
            for len in 0..SAMPLE_REQUEST.len() {
                assert!(parse_request(&SAMPLE_REQUEST[..len], MAX).unwrap().is_none());
            }
        }

        #[test]
        fn test_head_too_large() {
            assert!(matches!(
                parse_request(SAMPLE_REQUEST, 64),
                Err(WebSocketError::InvalidHandshake(HandshakeError::HeadTooLarge(64)))
            ));
            assert!(matches!(
                parse_request(&[b'a'; 65], 64),
                Err(WebSocketError::InvalidHandshake(HandshakeError::HeadTooLarge(64)))
            ));
        }

        #[test]
        fn test_malformed_head() {
            assert!(matches!(
                parse_request(b"GET\r\n\r\n", MAX),
                Err(WebSocketError::InvalidHandshake(HandshakeError::Malformed))
            ));
            assert!(matches!(
                parse_response(b"HTTP/1.1 abc Nope\r\n\r\n", MAX),
                Err(WebSocketError::InvalidHandshake(HandshakeError::Malformed))
            ));
        }

        #[test]
        fn test_parse_response() {
            let src = b"HTTP/1.1 101 Web Socket Protocol Handshake\r\nUpgrade: WebSocket\r\n\r\n";
            let (response, consumed) = parse_response(src, MAX).unwrap().unwrap();
            assert_eq!(consumed, src.len());
            assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

            let (response, _) = parse_response(b"HTTP/1.1 404\r\n\r\n", MAX)
                .unwrap()
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        #[test]
        fn test_write_and_parse_request() {
            let handshake = ClientHandshake::new(
                &Url::parse("ws://localhost:9001/echo?x=1").unwrap(),
                &Options::default(),
            )
            .unwrap();
            let bytes = handshake.to_bytes();

            let request = request(&bytes);
            assert_eq!(target(&request), "/echo?x=1");
            assert_eq!(request.headers().get(header::HOST).unwrap(), "localhost:9001");
            assert_eq!(
                request.headers().get(header::SEC_WEBSOCKET_KEY).unwrap(),
                handshake.key.as_deref().unwrap()
            );
        }

        #[test]
        fn test_header_lists() {
            assert_eq!(
                protocol_list("chat, superchat").unwrap().1,
                vec!["chat", "superchat"]
            );
            assert!(protocol_list("chat,, x").is_err());
            assert_eq!(
                extension_list("permessage-deflate; server_no_context_takeover; client_max_window_bits=10")
                    .unwrap()
                    .1,
                vec!["permessage-deflate"]
            );
        }
    }

    mod server_tests {
        use super::*;

        #[test]
        fn test_accept_key() {
            assert_eq!(
                accept_key(b"dGhlIHNhbXBsZSBub25jZQ=="),
                "s3pPLMBiTxaQ9kYGzxo4wP99Tes="
            );
        }

        #[test]
        fn test_generated_key_decodes_to_16_bytes() {
            let key = generate_key();
            assert_eq!(BASE64_STANDARD.decode(key).unwrap().len(), 16);
        }

        #[test]
        fn test_accept_request() {
            let options = Options::default().with_protocols(["superchat", "chat"]);
            let (response, negotiation) = accept(&request(SAMPLE_REQUEST), &options).unwrap();

            assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
            assert_eq!(
                response.headers().get(header::SEC_WEBSOCKET_ACCEPT).unwrap(),
                "s3pPLMBiTxaQ9kYGzxo4wP99Tes="
            );
            assert_eq!(
                response.headers().get(header::SEC_WEBSOCKET_PROTOCOL).unwrap(),
                "chat"
            );
            assert!(!response.headers().contains_key(header::SEC_WEBSOCKET_EXTENSIONS));

            assert_eq!(negotiation.draft, Draft::Rfc6455);
            assert_eq!(negotiation.protocol.as_deref(), Some("chat"));
            assert_eq!(negotiation.offered_extensions, vec!["permessage-deflate"]);
            assert_eq!(negotiation.resource, "/chat?room=1");
        }

        #[test]
        fn test_required_headers() {
            let cases: [(&str, &str, HandshakeError); 4] = [
                ("Upgrade: websocket\r\n", "", HandshakeError::InvalidUpgradeHeader),
                (
                    "Connection: keep-alive, Upgrade\r\n",
                    "Connection: keep-alive\r\n",
                    HandshakeError::InvalidConnectionHeader,
                ),
                (
                    "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
                    "Sec-WebSocket-Key: c2hvcnQ=\r\n",
                    HandshakeError::InvalidSecWebSocketKey,
                ),
                (
                    "Sec-WebSocket-Version: 13\r\n",
                    "Sec-WebSocket-Version: 8\r\n",
                    HandshakeError::InvalidSecWebsocketVersion,
                ),
            ];

            for (from, to, expected) in cases {
                let src = String::from_utf8(SAMPLE_REQUEST.to_vec())
                    .unwrap()
                    .replace(from, to);
                match accept(&request(src.as_bytes()), &Options::default()) {
                    Err(WebSocketError::InvalidHandshake(err)) => assert_eq!(err, expected),
                    other => panic!("expected {expected:?}, got {other:?}"),
                }
            }
        }

        #[test]
        fn test_missing_key() {
            let src = String::from_utf8(SAMPLE_REQUEST.to_vec())
                .unwrap()
                .replace("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "");
            assert!(matches!(
                accept(&request(src.as_bytes()), &Options::default()),
                Err(WebSocketError::InvalidHandshake(
                    HandshakeError::MissingSecWebSocketKey
                ))
            ));
        }

        #[test]
        fn test_invalid_method() {
            let src = String::from_utf8(SAMPLE_REQUEST.to_vec())
                .unwrap()
                .replacen("GET", "POST", 1);
            assert!(matches!(
                accept(&request(src.as_bytes()), &Options::default()),
                Err(WebSocketError::InvalidHandshake(HandshakeError::InvalidMethod(m))) if m == "POST"
            ));
        }

        #[test]
        fn test_no_matching_draft() {
            let src = b"GET / HTTP/1.1\r\nHost: a\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
            assert!(matches!(
                accept(&request(src), &Options::default()),
                Err(WebSocketError::NoMatchingDraft)
            ));
            assert!(matches!(
                select_draft(&request(SAMPLE_REQUEST), &[]),
                Err(WebSocketError::NoMatchingDraft)
            ));
        }

        #[test]
        fn test_write_response() {
            let (response, _) = accept(&request(SAMPLE_REQUEST), &Options::default()).unwrap();
            let mut dst = BytesMut::new();
            write_response(&response, "Switching Protocols", &mut dst);

            assert!(dst.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));
            assert!(dst.ends_with(b"\r\n\r\n"));
            let (parsed, _) = parse_response(&dst, MAX).unwrap().unwrap();
            assert_eq!(parsed.headers(), response.headers());
        }

        #[test]
        fn test_rejection_advertises_version() {
            let mut dst = BytesMut::new();
            write_rejection(
                &HandshakeError::InvalidSecWebsocketVersion.into(),
                &mut dst,
            );
            let (response, _) = parse_response(&dst, MAX).unwrap().unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                response.headers().get(header::SEC_WEBSOCKET_VERSION).unwrap(),
                "13"
            );
        }
    }

    mod client_tests {
        use super::*;

        fn client(options: &Options) -> ClientHandshake {
            ClientHandshake::new(&Url::parse("ws://example.com/socket").unwrap(), options).unwrap()
        }

        #[test]
        fn test_client_request_headers() {
            let options = Options::default().with_protocols(["chat", "superchat"]);
            let handshake = client(&options);
            let headers = handshake.request().headers();

            assert_eq!(handshake.draft(), Draft::Rfc6455);
            assert_eq!(headers.get(header::HOST).unwrap(), "example.com");
            assert_eq!(headers.get(header::SEC_WEBSOCKET_VERSION).unwrap(), "13");
            assert_eq!(
                headers.get(header::SEC_WEBSOCKET_PROTOCOL).unwrap(),
                "chat, superchat"
            );
        }

        #[test]
        fn test_missing_host() {
            let url = Url::parse("unix:/run/socket").unwrap();
            assert!(matches!(
                ClientHandshake::new(&url, &Options::default()),
                Err(WebSocketError::UrlParseError(url::ParseError::EmptyHost))
            ));
        }

        #[test]
        fn test_verify_response() {
            let options = Options::default().with_protocols(["chat"]);
            let handshake = client(&options);

            let negotiation = handshake
                .verify(
                    &response_for(&handshake, "Sec-WebSocket-Protocol: chat\r\n"),
                    &options,
                )
                .unwrap();
            assert_eq!(negotiation.protocol.as_deref(), Some("chat"));
            assert_eq!(negotiation.resource, "/socket");
        }

        #[test]
        fn test_accept_mismatch() {
            let options = Options::default();
            let handshake = client(&options);
            let other = client(&options);

            assert!(matches!(
                handshake.verify(&response_for(&other, ""), &options),
                Err(WebSocketError::InvalidHandshake(HandshakeError::AcceptMismatch))
            ));
        }

        #[test]
        fn test_status_must_be_101() {
            let options = Options::default();
            let handshake = client(&options);
            let (response, _) = parse_response(b"HTTP/1.1 403 Forbidden\r\n\r\n", MAX)
                .unwrap()
                .unwrap();

            assert!(matches!(
                handshake.verify(&response, &options),
                Err(WebSocketError::InvalidHandshake(HandshakeError::InvalidStatusCode(403)))
            ));
        }

        #[test]
        fn test_unsolicited_protocol_and_extension() {
            let options = Options::default();
            let handshake = client(&options);

            assert!(matches!(
                handshake.verify(
                    &response_for(&handshake, "Sec-WebSocket-Protocol: chat\r\n"),
                    &options
                ),
                Err(WebSocketError::InvalidHandshake(HandshakeError::UnsolicitedProtocol(p))) if p == "chat"
            ));
            assert!(matches!(
                handshake.verify(
                    &response_for(&handshake, "Sec-WebSocket-Extensions: permessage-deflate\r\n"),
                    &options
                ),
                Err(WebSocketError::InvalidHandshake(HandshakeError::UnsolicitedExtension(e))) if e == "permessage-deflate"
            ));
        }
    }
}
