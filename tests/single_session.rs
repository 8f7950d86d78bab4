//! Scenario 1: a single small session relays bytes end to end through one
//! tunnel between a client listener and a server listener, with the
//! upstream pool simulated by a plain echo-style TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use minerproxy_client::{ClientListener, TunnelPool};
use minerproxy_crypto::Cipher;
use minerproxy_server::{LoggingDisconnectSink, LoggingStatsSink, ServerListener};

const SECRET: &str = "abcdefghijklmnop";

async fn local_addr(listener: &TcpListener) -> SocketAddr {
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn hello_pool_round_trips_through_the_relay() {
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = local_addr(&upstream_listener).await;
    tokio::spawn(async move {
        let (mut stream, _) = upstream_listener.accept().await.unwrap();
        let mut buf = vec![0u8; "hello-pool\n".len()];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello-pool\n");
        stream.write_all(b"ok\n").await.unwrap();
    });

    let server_tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = local_addr(&server_tcp).await;
    let server = ServerListener::new(
        server_addr,
        SECRET,
        upstream_addr,
        Duration::from_secs(360),
        Arc::new(LoggingDisconnectSink),
        Arc::new(LoggingStatsSink),
        CancellationToken::new(),
    );
    drop(server_tcp); // ServerListener binds its own listener on `serve`
    tokio::spawn(server.serve());

    // Give the server a moment to bind before the pool dials it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pool = TunnelPool::connect(
        server_addr,
        SECRET,
        "client-1".into(),
        None,
        2,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let client_tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client_listen_addr = local_addr(&client_tcp).await;
    drop(client_tcp);
    let cipher = Cipher::from_secret(SECRET);
    let listener = ClientListener::new(client_listen_addr, pool, cipher, CancellationToken::new());
    tokio::spawn(listener.serve());

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut local = TcpStream::connect(client_listen_addr).await.unwrap();
    local.write_all(b"hello-pool\n").await.unwrap();

    let mut reply = vec![0u8; "ok\n".len()];
    local.read_exact(&mut reply).await.unwrap();
    assert_eq!(&reply, b"ok\n");
}
