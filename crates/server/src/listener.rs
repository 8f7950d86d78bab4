use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use minerproxy_core::{FrameType, Hello, HANDSHAKE_TIMEOUT};
use minerproxy_crypto::Cipher;
use minerproxy_tunnel::Tunnel;

use crate::session::serve_session;
use crate::stats::{DisconnectEvent, DisconnectSink, StatsSink, StatsSnapshot};
use crate::ServerError;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

struct AcceptedTunnel {
    tunnel: Tunnel,
    client_id: String,
    upstream_addr: SocketAddr,
}

struct Registry {
    tunnels: Mutex<Vec<AcceptedTunnel>>,
}

/// Accepts tunnels on a single address, verifies each one's handshake,
/// and demultiplexes their frames into upstream pool connections.
pub struct ServerListener {
    listen_addr: SocketAddr,
    cipher: Cipher,
    default_upstream: SocketAddr,
    disconnect_threshold: Duration,
    disconnect_sink: Arc<dyn DisconnectSink>,
    stats_sink: Arc<dyn StatsSink>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
}

impl ServerListener {
    pub fn new(
        listen_addr: SocketAddr,
        secret: &str,
        default_upstream: SocketAddr,
        disconnect_threshold: Duration,
        disconnect_sink: Arc<dyn DisconnectSink>,
        stats_sink: Arc<dyn StatsSink>,
        cancel: CancellationToken,
    ) -> Self {
        ServerListener {
            listen_addr,
            cipher: Cipher::from_secret(secret),
            default_upstream,
            disconnect_threshold,
            disconnect_sink,
            stats_sink,
            registry: Arc::new(Registry { tunnels: Mutex::new(Vec::new()) }),
            cancel,
        }
    }

    /// Run the accept loop and the periodic stats snapshot. Returns on a
    /// listener-level I/O error, or cleanly once `cancel` fires.
    pub async fn serve(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("server listener accepting tunnels on {}", self.listen_addr);

        tokio::spawn(Self::stats_loop(
            self.registry.clone(),
            self.stats_sink.clone(),
            self.cancel.clone(),
        ));

        loop {
            let (stream, peer_addr) = tokio::select! {
                result = listener.accept() => result?,
                _ = self.cancel.cancelled() => {
                    debug!("server listener on {} stopping for shutdown", self.listen_addr);
                    return Ok(());
                }
            };
            let cipher = self.cipher.clone();
            let default_upstream = self.default_upstream;
            let disconnect_threshold = self.disconnect_threshold;
            let disconnect_sink = self.disconnect_sink.clone();
            let registry = self.registry.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                Self::handle_tunnel(
                    stream,
                    peer_addr,
                    cipher,
                    default_upstream,
                    disconnect_threshold,
                    disconnect_sink,
                    registry,
                    cancel,
                )
                .await;
            });
        }
    }

    async fn handle_tunnel(
        stream: TcpStream,
        peer_addr: SocketAddr,
        cipher: Cipher,
        default_upstream: SocketAddr,
        disconnect_threshold: Duration,
        disconnect_sink: Arc<dyn DisconnectSink>,
        registry: Arc<Registry>,
        cancel: CancellationToken,
    ) {
        let (tunnel, mut unrouted) = Tunnel::spawn(stream, cancel);

        let hello = match tokio::time::timeout(HANDSHAKE_TIMEOUT, unrouted.recv()).await {
            Ok(Some(frame)) if frame.frame_type == FrameType::Open => {
                match cipher.decrypt(&frame.payload).ok().and_then(|pt| Hello::decode(&pt).ok()) {
                    Some(hello) => hello,
                    None => {
                        debug!("tunnel from {peer_addr} sent an undecryptable handshake, dropping");
                        tunnel.close();
                        return;
                    }
                }
            }
            Ok(_) => {
                debug!("tunnel from {peer_addr} did not open with a handshake frame, dropping");
                return;
            }
            Err(_) => {
                debug!("tunnel from {peer_addr} handshake timed out, dropping");
                return;
            }
        };

        let upstream_addr = hello.pool_override.unwrap_or(default_upstream);
        info!("tunnel from {peer_addr} active for client {}", hello.client_id);

        registry.tunnels.lock().unwrap().push(AcceptedTunnel {
            tunnel: tunnel.clone(),
            client_id: hello.client_id.clone(),
            upstream_addr,
        });

        loop {
            let Some(frame) = unrouted.recv().await else {
                break;
            };
            if frame.frame_type == FrameType::Close {
                continue;
            }
            let session_id = frame.session_id;
            let tunnel = tunnel.clone();
            let cipher = cipher.clone();
            tokio::spawn(async move {
                serve_session(session_id, frame, tunnel, upstream_addr, cipher).await;
            });
        }

        let last_seen = SystemTime::now();
        registry.tunnels.lock().unwrap().retain(|t| !t.tunnel.ptr_eq(&tunnel));
        warn!("tunnel for client {} disconnected", hello.client_id);

        tokio::time::sleep(disconnect_threshold).await;
        disconnect_sink.on_disconnect(DisconnectEvent {
            client_id: hello.client_id,
            last_seen,
            duration: disconnect_threshold,
        });
    }

    async fn stats_loop(registry: Arc<Registry>, stats_sink: Arc<dyn StatsSink>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STATS_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    debug!("stats loop stopping for shutdown");
                    return;
                }
            }
            let tunnels = registry.tunnels.lock().unwrap();
            let mut per_client: HashMap<String, usize> = HashMap::new();
            let mut active_sessions = 0usize;
            let mut bytes_in = 0u64;
            let mut bytes_out = 0u64;
            for entry in tunnels.iter() {
                if entry.tunnel.is_dead() {
                    continue;
                }
                active_sessions += entry.tunnel.session_count();
                bytes_in += entry.tunnel.bytes_in();
                bytes_out += entry.tunnel.bytes_out();
                *per_client.entry(entry.client_id.clone()).or_insert(0) += 1;
            }
            let snapshot = StatsSnapshot {
                active_tunnels: tunnels.iter().filter(|t| !t.tunnel.is_dead()).count(),
                active_sessions,
                bytes_in,
                bytes_out,
                per_client: per_client.into_iter().collect(),
            };
            drop(tunnels);
            stats_sink.on_snapshot(snapshot);
        }
    }
}
