//! Connection lifecycle.
//!
//! ```text
//! NotYetConnected -> Connecting -> Open -> Closing -> Closed
//!                         \____________________________/
//! ```
//!
//! A [`Connection`] never performs I/O itself. Inbound bytes arrive through
//! [`Connection::feed`]; outbound bytes leave through the [`Transport`]. Every observable event
//! is reported to the [`Handler`], synchronously, on the thread that caused it.
//!
//! # Locking
//! Inbound processing holds the reader lock for the whole [`Connection::feed`] call, so feeds
//! are serialized. Outbound frames are encoded and written under the writer lock, so frames from
//! concurrent senders never interleave on the wire. The state lock is always taken last and is
//! never held while a handler callback runs.
use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder as _, Encoder as _};
use url::Url;

use crate::{
    close::CloseCode,
    codec::{Decoder, Encoder},
    fragment::Reassembler,
    frame::{self, Frame, FrameBuilder, FrameView, OpCode, MAX_CONTROL_PAYLOAD},
    handshake::{self, ClientHandshake, Negotiation},
    FrameError, Options, Result, Role, WebSocketError,
};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Created, no handshake started.
    NotYetConnected,
    /// Opening handshake in progress.
    Connecting,
    Open,
    /// A close frame was sent and the peer's answer is awaited.
    Closing,
    Closed,
}

/// Outbound side of the byte stream a connection runs on.
pub trait Transport: Send + Sync + 'static {
    /// Queues bytes for the peer. Calls arrive in wire order.
    fn write(&self, bytes: Bytes) -> io::Result<()>;

    /// Releases the stream once the connection reached [`ReadyState::Closed`].
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn write(&self, bytes: Bytes) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn close(&self) {
        (**self).close()
    }
}

/// Application callbacks.
///
/// Callbacks run while the connection processes inbound bytes. They may send on, or close, the
/// connection they receive, but must not call [`Connection::feed`] on it.
#[allow(unused_variables)]
pub trait Handler: Send + Sync + 'static {
    /// The handshake completed. Called exactly once per connection.
    fn on_open(&self, ws: &Connection, negotiation: &Negotiation) {}

    /// A complete text or binary message arrived.
    fn on_message(&self, ws: &Connection, message: FrameView);

    /// The connection reached [`ReadyState::Closed`]. Called exactly once per connection.
    ///
    /// `remote` is `true` when the peer initiated the close, or dropped the stream.
    fn on_close(&self, ws: &Connection, code: CloseCode, reason: &str, remote: bool) {}

    /// The connection is failing; `on_close` follows.
    fn on_error(&self, ws: &Connection, err: &WebSocketError) {}

    /// A ping arrived. The pong has already been sent.
    fn on_ping(&self, ws: &Connection, payload: &Bytes) {}

    fn on_pong(&self, ws: &Connection, payload: &Bytes) {}
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn on_open(&self, ws: &Connection, negotiation: &Negotiation) {
        (**self).on_open(ws, negotiation)
    }

    fn on_message(&self, ws: &Connection, message: FrameView) {
        (**self).on_message(ws, message)
    }

    fn on_close(&self, ws: &Connection, code: CloseCode, reason: &str, remote: bool) {
        (**self).on_close(ws, code, reason, remote)
    }

    fn on_error(&self, ws: &Connection, err: &WebSocketError) {
        (**self).on_error(ws, err)
    }

    fn on_ping(&self, ws: &Connection, payload: &Bytes) {
        (**self).on_ping(ws, payload)
    }

    fn on_pong(&self, ws: &Connection, payload: &Bytes) {
        (**self).on_pong(ws, payload)
    }
}

/// Reason echoed with a 1007 close frame that arrived without one.
const INVALID_DATA_REASON: &str = "invalid payload data";

/// Code and reason of a close frame.
type CloseInfo = (Option<CloseCode>, String);

struct CloseEvent {
    code: CloseCode,
    reason: String,
    remote: bool,
}

struct State {
    ready: ReadyState,
    negotiation: Option<Negotiation>,
    /// Request sent by a client, kept until the response arrives.
    client: Option<ClientHandshake>,
    /// Close frame sent by this endpoint.
    local_close: Option<CloseInfo>,
    /// Close frame received from the peer.
    remote_close: Option<CloseInfo>,
}

impl State {
    /// Moves to `Closed`. Returns the event to report, or `None` if the connection was
    /// already closed.
    fn closed(
        &mut self,
        code: CloseCode,
        reason: impl Into<String>,
        remote: bool,
    ) -> Option<CloseEvent> {
        if self.ready == ReadyState::Closed {
            return None;
        }
        self.ready = ReadyState::Closed;
        Some(CloseEvent {
            code,
            reason: reason.into(),
            remote,
        })
    }
}

struct Reader {
    buf: BytesMut,
    decoder: Option<Decoder>,
    reassembler: Reassembler,
}

struct Writer {
    buf: BytesMut,
    encoder: Option<Encoder>,
    /// Opcode of an outbound fragmented message in progress.
    fragment: Option<OpCode>,
}

impl Writer {
    /// Rejects data frames that would interleave with an outbound fragmented message.
    fn track(&mut self, opcode: OpCode, fin: bool) -> Result<()> {
        match opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(FrameError::InvalidFragment.into());
                }
                if !fin {
                    self.fragment = Some(opcode);
                }
            }
            OpCode::Continuation => {
                if self.fragment.is_none() {
                    return Err(FrameError::InvalidContinuationFrame.into());
                }
                if fin {
                    self.fragment = None;
                }
            }
            OpCode::Close | OpCode::Ping | OpCode::Pong => {}
        }
        Ok(())
    }
}

struct Shared {
    role: Role,
    options: Options,
    transport: Box<dyn Transport>,
    handler: Box<dyn Handler>,
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
    state: Mutex<State>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Longest prefix of `reason` that fits a close frame.
fn truncate_reason(reason: &str) -> &str {
    let mut end = reason.len().min(MAX_CONTROL_PAYLOAD - 2);
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// One WebSocket connection.
///
/// `Connection` is a cheap handle: clones share the same connection, so it can be handed to
/// other threads for sending while one thread feeds inbound bytes.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.shared.role)
            .field("state", &self.ready_state())
            .finish()
    }
}

impl Connection {
    /// Creates a connection in [`ReadyState::NotYetConnected`]. Start the handshake with
    /// [`Connection::connect`] (client) or [`Connection::accept`] (server).
    pub fn new(
        role: Role,
        transport: impl Transport,
        handler: impl Handler,
        options: Options,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                role,
                options,
                transport: Box::new(transport),
                handler: Box::new(handler),
                reader: Mutex::new(Reader {
                    buf: BytesMut::with_capacity(8192),
                    decoder: None,
                    reassembler: Reassembler::new(),
                }),
                writer: Mutex::new(Writer {
                    buf: BytesMut::new(),
                    encoder: None,
                    fragment: None,
                }),
                state: Mutex::new(State {
                    ready: ReadyState::NotYetConnected,
                    negotiation: None,
                    client: None,
                    local_close: None,
                    remote_close: None,
                }),
            }),
        }
    }

    /// Creates a connection whose handshake was completed elsewhere. It starts in
    /// [`ReadyState::Open`] and reports `on_open` before returning.
    pub fn open(
        role: Role,
        transport: impl Transport,
        handler: impl Handler,
        options: Options,
        negotiation: Negotiation,
    ) -> Self {
        let ws = Self::new(role, transport, handler, options);
        let result = {
            let mut reader = lock(&ws.shared.reader);
            ws.establish(&mut reader, negotiation, None)
        };
        if let Err(err) = result {
            ws.fail(err);
        }
        ws
    }

    /// Sends the opening request for `url`. Client role only.
    pub fn connect(&self, url: &Url) -> Result<()> {
        let handshake = ClientHandshake::new(url, &self.shared.options)?;
        let head = handshake.to_bytes().freeze();

        {
            let _writer = lock(&self.shared.writer);
            let mut state = lock(&self.shared.state);
            if state.ready != ReadyState::NotYetConnected {
                return Err(WebSocketError::InvalidState(state.ready));
            }
            state.ready = ReadyState::Connecting;
            state.client = Some(handshake);
            self.shared.transport.write(head)?;
        }

        #[cfg(feature = "logging")]
        log::debug!("client handshake sent to {url}");

        self.feed(&[]);
        Ok(())
    }

    /// Waits for an opening request. Server role only.
    pub fn accept(&self) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if state.ready != ReadyState::NotYetConnected {
                return Err(WebSocketError::InvalidState(state.ready));
            }
            state.ready = ReadyState::Connecting;
        }

        self.feed(&[]);
        Ok(())
    }

    /// Processes bytes received from the peer.
    ///
    /// Partial handshakes and frames are buffered until the rest arrives. Any protocol violation
    /// fails the connection: `on_error` and `on_close` are reported and the transport is closed.
    pub fn feed(&self, data: &[u8]) {
        let mut reader = lock(&self.shared.reader);
        reader.buf.extend_from_slice(data);

        if let Err(err) = self.process(&mut reader) {
            self.fail(err);
        }
    }

    fn process(&self, reader: &mut Reader) -> Result<()> {
        loop {
            match self.ready_state() {
                ReadyState::NotYetConnected => return Ok(()),
                ReadyState::Connecting => {
                    if !self.read_handshake(reader)? {
                        return Ok(());
                    }
                }
                ReadyState::Open | ReadyState::Closing => {
                    let Reader { buf, decoder, .. } = &mut *reader;
                    let Some(decoder) = decoder.as_mut() else {
                        return Ok(());
                    };
                    let Some(frame) = decoder.decode(buf)? else {
                        return Ok(());
                    };
                    self.on_frame(reader, frame)?;
                }
                ReadyState::Closed => {
                    reader.buf.clear();
                    return Ok(());
                }
            }
        }
    }

    /// Completes the handshake if its head is buffered. Returns `false` while waiting for it.
    fn read_handshake(&self, reader: &mut Reader) -> Result<bool> {
        let max_size = self.shared.options.max_handshake_size();

        match self.shared.role {
            Role::Server => {
                let Some((request, len)) = handshake::parse_request(&reader.buf, max_size)? else {
                    return Ok(false);
                };
                reader.buf.advance(len);

                let (response, negotiation) = handshake::accept(&request, &self.shared.options)?;
                let mut head = BytesMut::new();
                handshake::write_response(
                    &response,
                    negotiation.draft.ops().status_reason,
                    &mut head,
                );
                self.establish(reader, negotiation, Some(head.freeze()))?;
            }
            Role::Client => {
                let Some((response, len)) = handshake::parse_response(&reader.buf, max_size)?
                else {
                    return Ok(false);
                };
                reader.buf.advance(len);

                let pending = lock(&self.shared.state).client.take();
                let pending =
                    pending.ok_or(WebSocketError::InvalidState(ReadyState::Connecting))?;
                let negotiation = pending.verify(&response, &self.shared.options)?;
                self.establish(reader, negotiation, None)?;
            }
        }

        Ok(true)
    }

    /// Switches to `Open` with the negotiated draft, after writing the server's response head.
    fn establish(
        &self,
        reader: &mut Reader,
        negotiation: Negotiation,
        head: Option<Bytes>,
    ) -> Result<()> {
        let role = self.shared.role;
        let draft = negotiation.draft;
        reader.decoder = Some(Decoder::new(
            role,
            draft,
            self.shared.options.max_payload_read(),
        ));

        {
            let mut writer = lock(&self.shared.writer);
            let mut state = lock(&self.shared.state);
            if state.ready == ReadyState::Closed {
                return Ok(());
            }
            if let Some(head) = head {
                self.shared.transport.write(head)?;
            }
            writer.encoder = Some(Encoder::new(role, draft));
            state.ready = ReadyState::Open;
            state.negotiation = Some(negotiation.clone());
        }

        #[cfg(feature = "logging")]
        log::debug!("{role} connection open ({draft})");

        self.shared.handler.on_open(self, &negotiation);
        Ok(())
    }

    fn on_frame(&self, reader: &mut Reader, frame: Frame) -> Result<()> {
        frame.validate_received()?;

        let opcode = frame.opcode();
        if !opcode.is_control() {
            if self.ready_state() == ReadyState::Closing {
                // no data is delivered once our close frame is out
                return Ok(());
            }
            if (!frame.fin() || opcode == OpCode::Continuation)
                && reader.reassembler.buffered_len() + frame.payload().len()
                    > self.shared.options.max_read_buffer()
            {
                return Err(WebSocketError::MessageTooLarge);
            }
        }

        let Some(message) = reader.reassembler.push(frame)? else {
            return Ok(());
        };

        let handler = &self.shared.handler;
        match message.opcode {
            OpCode::Text => {
                if self.shared.options.check_utf8 && !frame::is_utf8(&message.payload) {
                    return Err(WebSocketError::InvalidUTF8);
                }
                handler.on_message(self, message);
            }
            OpCode::Binary => handler.on_message(self, message),
            OpCode::Ping => {
                if self.ready_state() == ReadyState::Open {
                    match self.send_frame(FrameBuilder::pong(message.payload.clone()).build()?) {
                        Ok(()) | Err(WebSocketError::ConnectionClosed) => {}
                        Err(err) => return Err(err),
                    }
                }
                handler.on_ping(self, &message.payload);
            }
            OpCode::Pong => handler.on_pong(self, &message.payload),
            OpCode::Close => {
                self.on_remote_close(
                    message.close_code(),
                    message.close_reason().unwrap_or_default(),
                )?;
            }
            // never emitted by the reassembler
            OpCode::Continuation => {}
        }

        Ok(())
    }

    fn on_remote_close(&self, code: Option<CloseCode>, reason: &str) -> Result<()> {
        let event = {
            let mut writer = lock(&self.shared.writer);
            let mut state = lock(&self.shared.state);
            state.remote_close = Some((code, reason.to_owned()));

            match state.ready {
                ReadyState::Open => {
                    #[cfg(feature = "logging")]
                    log::debug!("close received ({code:?}), echoing");

                    // 1007 is the only code that cannot be sent without a reason
                    let echo_reason = match code {
                        Some(CloseCode::Invalid) if reason.is_empty() => INVALID_DATA_REASON,
                        Some(CloseCode::Invalid) => reason,
                        _ => "",
                    };
                    let echo = Frame::close(code, echo_reason)?;
                    state.local_close = Some((code, echo_reason.to_owned()));
                    let event = state.closed(code.unwrap_or(CloseCode::Status), reason, true);
                    if let Err(_err) = self.write_frame(&mut writer, echo) {
                        #[cfg(feature = "logging")]
                        log::debug!("close echo not written: {_err}");
                    }
                    event
                }
                ReadyState::Closing => {
                    #[cfg(feature = "logging")]
                    log::debug!("close handshake completed ({code:?})");

                    let (local_code, local_reason) = state
                        .local_close
                        .clone()
                        .unwrap_or_else(|| (code, reason.to_owned()));
                    state.closed(local_code.unwrap_or(CloseCode::Status), local_reason, false)
                }
                _ => None,
            }
        };

        if let Some(event) = event {
            self.finish(event);
        }
        Ok(())
    }

    /// Fails the connection: closes it without waiting for the peer.
    ///
    /// A close frame carrying the error's close code is sent when the connection was open and
    /// the code may go on the wire; a server still in the handshake answers `400 Bad Request`.
    fn fail(&self, err: WebSocketError) {
        let code = err.close_code();
        let event = {
            let mut writer = lock(&self.shared.writer);
            let mut state = lock(&self.shared.state);
            let previous = state.ready;
            let Some(event) = state.closed(code, err.to_string(), false) else {
                return;
            };

            match previous {
                ReadyState::Open if code.is_allowed() => {
                    let reason = truncate_reason(&event.reason);
                    if let Ok(frame) = Frame::close(code, reason) {
                        state.local_close = Some((Some(code), reason.to_owned()));
                        if let Err(_err) = self.write_frame(&mut writer, frame) {
                            #[cfg(feature = "logging")]
                            log::debug!("close frame not written: {_err}");
                        }
                    }
                }
                ReadyState::Connecting if self.shared.role == Role::Server => {
                    let mut head = BytesMut::new();
                    handshake::write_rejection(&err, &mut head);
                    if let Err(_err) = self.shared.transport.write(head.freeze()) {
                        #[cfg(feature = "logging")]
                        log::debug!("handshake rejection not written: {_err}");
                    }
                }
                _ => {}
            }
            event
        };

        #[cfg(feature = "logging")]
        log::debug!("{} connection failed: {err}", self.shared.role);

        self.shared.handler.on_error(self, &err);
        self.finish(event);
    }

    fn finish(&self, event: CloseEvent) {
        #[cfg(feature = "logging")]
        log::debug!(
            "{} connection closed with {} (remote={})",
            self.shared.role,
            event.code,
            event.remote
        );

        self.shared.transport.close();
        self.shared
            .handler
            .on_close(self, event.code, &event.reason, event.remote);
    }

    /// Starts the closing handshake.
    ///
    /// The close frame is validated first: an unsendable code, or a reason without a code, is
    /// returned as [`WebSocketError::InvalidCloseFrame`] and nothing is sent. Closing a
    /// connection that is already closing or closed does nothing. A connection that never
    /// opened is closed immediately.
    pub fn close(&self, code: impl Into<Option<CloseCode>>, reason: &str) -> Result<()> {
        let code = code.into();
        let frame = Frame::close(code, reason)?;

        let event = {
            let mut writer = lock(&self.shared.writer);
            let mut state = lock(&self.shared.state);
            match state.ready {
                ReadyState::Open => {
                    #[cfg(feature = "logging")]
                    log::debug!("closing connection ({code:?})");

                    state.ready = ReadyState::Closing;
                    state.local_close = Some((code, reason.to_owned()));
                    self.write_frame(&mut writer, frame)?;
                    None
                }
                ReadyState::NotYetConnected | ReadyState::Connecting => {
                    state.local_close = Some((code, reason.to_owned()));
                    state.closed(code.unwrap_or(CloseCode::Status), reason, false)
                }
                ReadyState::Closing | ReadyState::Closed => None,
            }
        };

        if let Some(event) = event {
            self.finish(event);
        }
        Ok(())
    }

    /// Moves to `Closed` without a closing handshake, e.g. when a handshake or close timeout
    /// expired.
    pub fn force_close(&self, code: CloseCode, reason: &str) {
        let event = {
            let _writer = lock(&self.shared.writer);
            lock(&self.shared.state).closed(code, reason, false)
        };
        if let Some(event) = event {
            self.finish(event);
        }
    }

    /// Reports that the peer closed the stream.
    ///
    /// During a closing handshake this completes the close with the local code. Otherwise the
    /// connection closes abnormally (1006), as initiated by the peer.
    pub fn on_stream_closed(&self) {
        let event = {
            let _writer = lock(&self.shared.writer);
            let mut state = lock(&self.shared.state);
            match state.ready {
                ReadyState::Closing => {
                    let (code, reason) = state.local_close.clone().unwrap_or_default();
                    state.closed(code.unwrap_or(CloseCode::Status), reason, false)
                }
                _ => state.closed(CloseCode::Abnormal, "", true),
            }
        };

        if let Some(event) = event {
            self.finish(event);
        }
    }

    /// Reports a read or write failure of the stream. The connection fails with 1006.
    pub fn on_stream_error(&self, err: io::Error) {
        self.fail(err.into());
    }

    fn write_frame(&self, writer: &mut Writer, frame: Frame) -> Result<()> {
        let Writer { buf, encoder, .. } = writer;
        let Some(encoder) = encoder.as_mut() else {
            return Err(WebSocketError::InvalidState(ReadyState::Connecting));
        };

        encoder.encode(frame, buf)?;
        self.shared.transport.write(buf.split().freeze())?;
        Ok(())
    }

    /// Sends a frame.
    ///
    /// Close frames go through [`Connection::close`]. Data frames are checked against the
    /// negotiated draft and against an outbound fragmented message in progress.
    pub fn send_frame(&self, frame: Frame) -> Result<()> {
        if frame.opcode() == OpCode::Close {
            return self.close(frame.close_code(), frame.close_reason());
        }
        frame.validate()?;

        let mut writer = lock(&self.shared.writer);
        match self.ready_state() {
            ReadyState::Open => {}
            ReadyState::Closing | ReadyState::Closed => {
                return Err(WebSocketError::ConnectionClosed)
            }
            ready => return Err(WebSocketError::InvalidState(ready)),
        }

        if let Some(encoder) = writer.encoder.as_ref() {
            let draft = encoder.draft();
            if !draft.limits().allows(frame.opcode(), frame.fin()) {
                return Err(WebSocketError::UnsupportedByDraft(draft));
            }
        }
        writer.track(frame.opcode(), frame.fin())?;

        self.write_frame(&mut writer, frame)
    }

    /// Sends a complete message or control frame.
    pub fn send(&self, message: FrameView) -> Result<()> {
        match message.opcode {
            OpCode::Close => self.close(
                message.close_code(),
                message.close_reason().unwrap_or_default(),
            ),
            opcode => self.send_frame(FrameBuilder::new(opcode).payload(message.payload).build()?),
        }
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_frame(FrameBuilder::text(text).build()?)
    }

    pub fn send_binary(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(FrameBuilder::binary(payload).build()?)
    }

    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send_frame(FrameBuilder::ping(payload).build()?)
    }

    /// Sends one fragment of a message: `Text` or `Binary` starts it, `Continuation` carries
    /// the rest, and `fin` marks the last fragment.
    pub fn send_fragment(&self, opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Result<()> {
        self.send_frame(FrameBuilder::new(opcode).payload(payload).fin(fin).build()?)
    }

    /// Serializes `value` and sends it as a text message.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.send_frame(FrameBuilder::new(OpCode::Text).payload(payload).build()?)
    }

    pub fn ready_state(&self) -> ReadyState {
        lock(&self.shared.state).ready
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    pub fn is_closing(&self) -> bool {
        self.ready_state() == ReadyState::Closing
    }

    pub fn is_closed(&self) -> bool {
        self.ready_state() == ReadyState::Closed
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// The handshake result, once the connection opened.
    pub fn negotiation(&self) -> Option<Negotiation> {
        lock(&self.shared.state).negotiation.clone()
    }

    /// Code of the close frame this endpoint sent, if any. `Some(None)` is a close frame
    /// without code.
    pub fn local_close_code(&self) -> Option<Option<CloseCode>> {
        lock(&self.shared.state)
            .local_close
            .as_ref()
            .map(|(code, _)| *code)
    }

    /// Code of the close frame received from the peer, if any.
    pub fn remote_close_code(&self) -> Option<Option<CloseCode>> {
        lock(&self.shared.state)
            .remote_close
            .as_ref()
            .map(|(code, _)| *code)
    }
}
