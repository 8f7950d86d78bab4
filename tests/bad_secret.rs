//! Scenario 3: a tunnel whose handshake was encrypted with the wrong
//! secret never reaches an active state — the server closes the
//! connection outright instead of routing any session on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use minerproxy_core::{Frame, Hello, SessionId};
use minerproxy_crypto::Cipher;
use minerproxy_server::{LoggingDisconnectSink, LoggingStatsSink, ServerListener};
use minerproxy_tunnel::Tunnel;

#[tokio::test]
async fn mismatched_secret_tunnel_is_closed_not_activated() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let server = ServerListener::new(
        addr,
        "server-side-secret-16b",
        "127.0.0.1:1".parse().unwrap(),
        Duration::from_secs(360),
        Arc::new(LoggingDisconnectSink),
        Arc::new(LoggingStatsSink),
        CancellationToken::new(),
    );
    tokio::spawn(server.serve());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let (tunnel, _unrouted) = Tunnel::spawn(stream, CancellationToken::new());

    let wrong_cipher = Cipher::from_secret("client-side-secret");
    let hello = Hello { client_id: "client-1".into(), pool_override: None };
    tunnel
        .send(Frame::open(SessionId::HANDSHAKE, wrong_cipher.encrypt(&hello.encode())))
        .await
        .unwrap();

    // The server decrypts with its own secret, fails, and closes the
    // connection; the client-side tunnel observes EOF well within a
    // second and is never usable for a session.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(tunnel.is_dead(), "tunnel with a mismatched secret must never become active");
}
