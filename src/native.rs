//! Tokio adapter.
//!
//! [`WebSocket`] binds a [`Connection`] to any `AsyncRead + AsyncWrite` stream and drives it:
//! inbound bytes are fed to the connection, outbound bytes are written in order, and the
//! handshake and close timeouts from [`Options`] are enforced.
//!
//! ```no_run
//! use tokio::net::TcpListener;
//! use wscore::{native::WebSocket, Connection, FrameView, Handler, Options};
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!     fn on_message(&self, ws: &Connection, message: FrameView) {
//!         let _ = ws.send(message);
//!     }
//! }
//!
//! # async fn serve() -> wscore::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:9001").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let ws = WebSocket::server(stream, Echo, Options::default())?;
//!     tokio::spawn(ws.run());
//! }
//! # }
//! ```
use std::io;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::{self, Instant},
};
use url::Url;

use crate::{
    close::CloseCode,
    connection::{Connection, Handler, ReadyState, Transport},
    Options, Result, Role,
};

enum Outbound {
    Data(Bytes),
    Shutdown,
}

/// Hands outbound bytes to the task running [`WebSocket::run`].
struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for ChannelTransport {
    fn write(&self, bytes: Bytes) -> io::Result<()> {
        self.tx
            .send(Outbound::Data(bytes))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "websocket task stopped"))
    }

    fn close(&self) {
        let _ = self.tx.send(Outbound::Shutdown);
    }
}

/// A connection bound to an async byte stream.
pub struct WebSocket<S> {
    io: S,
    connection: Connection,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn with_role(io: S, role: Role, handler: impl Handler, options: Options) -> Self {
        let (tx, outbound) = mpsc::unbounded_channel();
        let connection = Connection::new(role, ChannelTransport { tx }, handler, options);
        Self {
            io,
            connection,
            outbound,
        }
    }

    /// Starts a client handshake for `url` over `io`. The request is written once
    /// [`WebSocket::run`] is polled.
    pub fn client(io: S, url: &Url, handler: impl Handler, options: Options) -> Result<Self> {
        let ws = Self::with_role(io, Role::Client, handler, options);
        ws.connection.connect(url)?;
        Ok(ws)
    }

    /// Waits for a client handshake on `io`.
    pub fn server(io: S, handler: impl Handler, options: Options) -> Result<Self> {
        let ws = Self::with_role(io, Role::Server, handler, options);
        ws.connection.accept()?;
        Ok(ws)
    }

    /// Handle for sending and closing from other tasks.
    pub fn connection(&self) -> Connection {
        self.connection.clone()
    }

    /// Drives the connection until it is closed and the stream shut down.
    ///
    /// Read and write failures are reported to the handler through `on_error` and `on_close`.
    pub async fn run(self) {
        let Self {
            io,
            connection,
            mut outbound,
        } = self;
        let options = connection.options().clone();
        let (mut reader, mut writer) = tokio::io::split(io);

        let mut buf = BytesMut::with_capacity(8192);
        let mut read_open = true;
        let mut watched = ReadyState::NotYetConnected;
        let mut deadline: Option<Instant> = None;

        loop {
            let state = connection.ready_state();
            if state != watched {
                watched = state;
                deadline = match state {
                    ReadyState::Connecting => Some(Instant::now() + options.handshake_timeout()),
                    ReadyState::Closing => Some(Instant::now() + options.close_timeout()),
                    _ => None,
                };
            }

            tokio::select! {
                biased;

                message = outbound.recv() => match message {
                    Some(Outbound::Data(bytes)) => {
                        let written = match writer.write_all(&bytes).await {
                            Ok(()) => writer.flush().await,
                            Err(err) => Err(err),
                        };
                        if let Err(err) = written {
                            connection.on_stream_error(err);
                        }
                    }
                    Some(Outbound::Shutdown) | None => {
                        if let Err(_err) = writer.shutdown().await {
                            #[cfg(feature = "logging")]
                            log::debug!("shutdown failed: {_err}");
                        }
                        break;
                    }
                },
                read = reader.read_buf(&mut buf), if read_open => match read {
                    Ok(0) => {
                        read_open = false;
                        connection.on_stream_closed();
                    }
                    Ok(_) => {
                        connection.feed(&buf);
                        buf.clear();
                    }
                    Err(err) => {
                        read_open = false;
                        connection.on_stream_error(err);
                    }
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    let reason = match watched {
                        ReadyState::Connecting => "handshake timeout",
                        _ => "close timeout",
                    };

                    #[cfg(feature = "logging")]
                    log::debug!("{reason}, dropping connection");

                    connection.force_close(CloseCode::Abnormal, reason);
                }
            }
        }
    }
}
