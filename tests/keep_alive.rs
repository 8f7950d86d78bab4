//! Scenario 4: an idle tunnel (no session traffic) survives well past a
//! single idle-timeout interval because the writer's periodic PING keeps
//! resetting the reader's idle clock.

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use minerproxy_tunnel::Tunnel;

/// Let pending socket I/O triggered by a just-elapsed timer actually run
/// before the next virtual-time advance.
async fn advance_and_drain(duration: Duration) {
    tokio::time::advance(duration).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn idle_tunnel_survives_multiple_ping_intervals() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    let client_stream = TcpStream::connect(addr).await.unwrap();
    let server_stream = accept.await.unwrap();

    let (client_tunnel, _client_unrouted) = Tunnel::spawn(client_stream, CancellationToken::new());
    let (server_tunnel, _server_unrouted) = Tunnel::spawn(server_stream, CancellationToken::new());

    // PING_INTERVAL is 30s, TUNNEL_IDLE_TIMEOUT is 90s. Step past three
    // ping intervals (comfortably more than one idle-timeout window)
    // with no session traffic at all; both sides must stay alive.
    for _ in 0..4 {
        advance_and_drain(Duration::from_secs(30)).await;
        assert!(!client_tunnel.is_dead(), "client tunnel died despite keep-alive pings");
        assert!(!server_tunnel.is_dead(), "server tunnel died despite keep-alive pings");
    }
}
