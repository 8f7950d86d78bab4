//! Scenario 6: once a client's sole tunnel has been down for longer than
//! the configured disconnect threshold, the server's `DisconnectSink` is
//! invoked exactly once with that client's id.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use minerproxy_client::TunnelPool;
use minerproxy_server::{DisconnectEvent, DisconnectSink, LoggingStatsSink, ServerListener};

const SECRET: &str = "abcdefghijklmnop";

struct CapturingSink {
    events: Mutex<Vec<DisconnectEvent>>,
}

impl DisconnectSink for CapturingSink {
    fn on_disconnect(&self, event: DisconnectEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[tokio::test]
async fn sink_fires_once_after_threshold_elapses() {
    let server_tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = server_tcp.local_addr().unwrap();
    drop(server_tcp);

    let sink = Arc::new(CapturingSink { events: Mutex::new(Vec::new()) });
    let server = ServerListener::new(
        server_addr,
        SECRET,
        "127.0.0.1:1".parse().unwrap(),
        Duration::from_secs(5),
        sink.clone(),
        Arc::new(LoggingStatsSink),
        CancellationToken::new(),
    );
    tokio::spawn(server.serve());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pool = TunnelPool::connect(
        server_addr,
        SECRET,
        "only-client".into(),
        None,
        1,
        CancellationToken::new(),
    )
    .await
    .unwrap();
    // Let the server observe the handshake before we pull the rug. Closing
    // the tunnel's TCP halves (not merely dropping the pool handle, which
    // the reader/writer tasks keep alive independently) is what the
    // server needs to observe as the client going away.
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.pick().unwrap().close();

    tokio::time::sleep(Duration::from_secs(6)).await;

    let events = sink.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].client_id, "only-client");
}
