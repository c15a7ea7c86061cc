use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::io::AsyncWriteExt;
use url::Url;
use wscore::{
    native::WebSocket, CloseCode, Connection, FrameView, Handler, Negotiation, Options,
};

#[derive(Default)]
struct Client {
    messages: Mutex<Vec<FrameView>>,
    closes: Mutex<Vec<(CloseCode, String, bool)>>,
}

impl Handler for Client {
    fn on_open(&self, ws: &Connection, _negotiation: &Negotiation) {
        ws.send_text("hello").unwrap();
    }

    fn on_message(&self, ws: &Connection, message: FrameView) {
        self.messages.lock().unwrap().push(message);
        ws.close(CloseCode::Normal, "done").unwrap();
    }

    fn on_close(&self, _ws: &Connection, code: CloseCode, reason: &str, remote: bool) {
        self.closes
            .lock()
            .unwrap()
            .push((code, reason.to_owned(), remote));
    }
}

/// Echoes messages and records closes.
#[derive(Default)]
struct Closes(Mutex<Vec<(CloseCode, String, bool)>>);

impl Handler for Closes {
    fn on_message(&self, ws: &Connection, message: FrameView) {
        let _ = ws.send(message);
    }

    fn on_close(&self, _ws: &Connection, code: CloseCode, reason: &str, remote: bool) {
        self.0.lock().unwrap().push((code, reason.to_owned(), remote));
    }
}

#[tokio::test]
async fn echo_over_duplex() -> anyhow::Result<()> {
    let _ = simple_logger::init_with_level(log::Level::Debug);

    let (client_io, server_io) = tokio::io::duplex(4096);
    let url = Url::parse("ws://localhost/echo")?;

    let server_closes = Arc::new(Closes::default());
    let client = Arc::new(Client::default());

    let server = WebSocket::server(server_io, server_closes.clone(), Options::default())?;
    let client_ws = WebSocket::client(client_io, &url, client.clone(), Options::default())?;
    let handle = client_ws.connection();

    tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(server.run(), client_ws.run()) },
    )
    .await?;

    assert_eq!(
        *client.messages.lock().unwrap(),
        vec![FrameView::text("hello")]
    );
    assert_eq!(
        *client.closes.lock().unwrap(),
        vec![(CloseCode::Normal, "done".to_owned(), false)]
    );
    assert_eq!(
        *server_closes.0.lock().unwrap(),
        vec![(CloseCode::Normal, "done".to_owned(), true)]
    );
    assert!(handle.is_closed());
    assert_eq!(handle.negotiation().map(|n| n.resource), Some("/echo".to_owned()));

    Ok(())
}

#[tokio::test]
async fn handshake_timeout() -> anyhow::Result<()> {
    let (_peer, server_io) = tokio::io::duplex(1024);
    let closes = Arc::new(Closes::default());
    let options = Options::default().with_handshake_timeout(Duration::from_millis(50));

    let server = WebSocket::server(server_io, closes.clone(), options)?;
    tokio::time::timeout(Duration::from_secs(5), server.run()).await?;

    assert_eq!(
        *closes.0.lock().unwrap(),
        vec![(CloseCode::Abnormal, "handshake timeout".to_owned(), false)]
    );
    Ok(())
}

#[tokio::test]
async fn peer_disconnect_is_abnormal() -> anyhow::Result<()> {
    let (client_io, server_io) = tokio::io::duplex(1024);
    let closes = Arc::new(Closes::default());

    let server = WebSocket::server(server_io, closes.clone(), Options::default())?;
    drop(client_io);
    tokio::time::timeout(Duration::from_secs(5), server.run()).await?;

    assert_eq!(
        *closes.0.lock().unwrap(),
        vec![(CloseCode::Abnormal, String::new(), true)]
    );
    Ok(())
}

/// Closes as soon as the handshake completes.
#[derive(Default)]
struct Closer(Mutex<Vec<(CloseCode, String, bool)>>);

impl Handler for Closer {
    fn on_open(&self, ws: &Connection, _negotiation: &Negotiation) {
        ws.close(CloseCode::Normal, "bye").unwrap();
    }

    fn on_message(&self, _ws: &Connection, _message: FrameView) {}

    fn on_close(&self, _ws: &Connection, code: CloseCode, reason: &str, remote: bool) {
        self.0.lock().unwrap().push((code, reason.to_owned(), remote));
    }
}

#[tokio::test]
async fn close_timeout() -> anyhow::Result<()> {
    let (mut peer, server_io) = tokio::io::duplex(4096);
    peer.write_all(
        b"GET /chat HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
          Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
          Sec-WebSocket-Version: 13\r\n\r\n",
    )
    .await?;

    let closer = Arc::new(Closer::default());
    let options = Options::default().with_close_timeout(Duration::from_millis(50));
    let server = WebSocket::server(server_io, closer.clone(), options)?;

    // the peer stays connected but never answers the close frame
    tokio::time::timeout(Duration::from_secs(5), server.run()).await?;

    assert_eq!(
        *closer.0.lock().unwrap(),
        vec![(CloseCode::Abnormal, "close timeout".to_owned(), false)]
    );
    drop(peer);
    Ok(())
}
