use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use minerproxy_core::{
    Frame, Hello, SessionId, HANDSHAKE_TIMEOUT, RECONNECT_BACKOFF_MAX, RECONNECT_BACKOFF_MIN,
    STARTUP_MAX_ATTEMPTS,
};
use minerproxy_crypto::Cipher;
use minerproxy_tunnel::Tunnel;

use crate::ClientError;

/// Grace period after sending the handshake hello during which a
/// same-RTT TCP close from the server is taken to mean "bad secret,
/// rejected" rather than an unrelated network hiccup.
const HANDSHAKE_REJECTION_GRACE: Duration = Duration::from_millis(200);

struct PoolInner {
    server_addr: SocketAddr,
    cipher: Cipher,
    client_id: String,
    pool_override: Option<SocketAddr>,
    tunnels: Mutex<Vec<Tunnel>>,
    round_robin: AtomicUsize,
    cancel: CancellationToken,
}

/// Maintains a pool of long-lived tunnels to one server and hands out the
/// least-loaded tunnel for each new session.
#[derive(Clone)]
pub struct TunnelPool {
    inner: Arc<PoolInner>,
}

impl TunnelPool {
    /// Establish the pool's first tunnel synchronously (escalating to a
    /// fatal error if it never succeeds within [`STARTUP_MAX_ATTEMPTS`]),
    /// then bring the remaining `desired_count - 1` tunnels up in the
    /// background using the same retry policy.
    ///
    /// `cancel` is the process-wide shutdown token. Every tunnel the pool
    /// establishes is spawned with it, and reconnect loops stop retrying
    /// once it fires rather than reconnecting during shutdown.
    pub async fn connect(
        server_addr: SocketAddr,
        secret: &str,
        client_id: String,
        pool_override: Option<SocketAddr>,
        desired_count: usize,
        cancel: CancellationToken,
    ) -> Result<Self, ClientError> {
        let inner = Arc::new(PoolInner {
            server_addr,
            cipher: Cipher::from_secret(secret),
            client_id,
            pool_override,
            tunnels: Mutex::new(Vec::new()),
            round_robin: AtomicUsize::new(0),
            cancel,
        });

        let first = Self::establish_with_retries(&inner, STARTUP_MAX_ATTEMPTS).await?;
        inner.tunnels.lock().unwrap().push(first.clone());
        tokio::spawn(Self::supervise_slot(inner.clone(), first));

        for _ in 1..desired_count {
            let inner = inner.clone();
            tokio::spawn(async move {
                match Self::establish_with_retries(&inner, STARTUP_MAX_ATTEMPTS).await {
                    Ok(tunnel) => {
                        inner.tunnels.lock().unwrap().push(tunnel.clone());
                        Self::supervise_slot(inner, tunnel).await;
                    }
                    Err(e) => warn!("tunnel slot gave up before first success: {e}"),
                }
            });
        }

        Ok(TunnelPool { inner })
    }

    /// Pick the tunnel with the fewest in-flight sessions, falling back
    /// to round-robin to break ties deterministically.
    pub fn pick(&self) -> Result<Tunnel, ClientError> {
        let tunnels = self.inner.tunnels.lock().unwrap();
        let live: Vec<&Tunnel> = tunnels.iter().filter(|t| !t.is_dead()).collect();
        if live.is_empty() {
            return Err(ClientError::PoolExhausted);
        }

        let min_sessions = live.iter().map(|t| t.session_count()).min().unwrap();
        let candidates: Vec<&&Tunnel> = live
            .iter()
            .filter(|t| t.session_count() == min_sessions)
            .collect();

        let pick = self.inner.round_robin.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok((*candidates[pick]).clone())
    }

    pub fn tunnel_count(&self) -> usize {
        self.inner.tunnels.lock().unwrap().iter().filter(|t| !t.is_dead()).count()
    }

    async fn supervise_slot(inner: Arc<PoolInner>, tunnel: Tunnel) {
        tunnel.closed().await;
        inner.tunnels.lock().unwrap().retain(|t| !t.is_dead());
        if inner.cancel.is_cancelled() {
            debug!("tunnel slot died during shutdown, not reconnecting");
            return;
        }
        debug!("tunnel slot died, reconnecting with backoff");

        loop {
            match Self::establish_with_retries(&inner, usize::MAX).await {
                Ok(tunnel) => {
                    inner.tunnels.lock().unwrap().push(tunnel.clone());
                    info!("tunnel slot reconnected");
                    tunnel.closed().await;
                    inner.tunnels.lock().unwrap().retain(|t| !t.is_dead());
                    if inner.cancel.is_cancelled() {
                        debug!("tunnel slot died during shutdown, not reconnecting");
                        return;
                    }
                    debug!("tunnel slot died again, reconnecting");
                }
                Err(ClientError::ShuttingDown) => {
                    debug!("tunnel slot reconnect loop stopping for shutdown");
                    return;
                }
                Err(e) => {
                    // establish_with_retries only gives up at usize::MAX
                    // attempts, which never happens in practice.
                    warn!("tunnel slot reconnect loop ended unexpectedly: {e}");
                    return;
                }
            }
        }
    }

    async fn establish_with_retries(
        inner: &Arc<PoolInner>,
        max_attempts: usize,
    ) -> Result<Tunnel, ClientError> {
        let mut backoff = RECONNECT_BACKOFF_MIN;
        let mut attempt = 0usize;
        loop {
            if inner.cancel.is_cancelled() {
                return Err(ClientError::ShuttingDown);
            }
            attempt += 1;
            match Self::establish_once(inner).await {
                Ok(tunnel) => return Ok(tunnel),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    warn!("tunnel handshake attempt {attempt} failed: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = inner.cancel.cancelled() => return Err(ClientError::ShuttingDown),
                    }
                    backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                }
            }
        }
    }

    async fn establish_once(inner: &Arc<PoolInner>) -> Result<Tunnel, ClientError> {
        let stream = tokio::select! {
            result = tokio::time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(inner.server_addr)) => {
                result.map_err(|_| ClientError::Handshake("connect timed out".into()))??
            }
            _ = inner.cancel.cancelled() => return Err(ClientError::ShuttingDown),
        };

        let (tunnel, _unrouted) = Tunnel::spawn(stream, inner.cancel.clone());
        let hello = Hello { client_id: inner.client_id.clone(), pool_override: inner.pool_override };
        let encrypted_hello = inner.cipher.encrypt(&hello.encode());
        tunnel.send(Frame::open(SessionId::HANDSHAKE, encrypted_hello)).await?;

        tokio::time::sleep(HANDSHAKE_REJECTION_GRACE).await;
        if tunnel.is_dead() {
            return Err(ClientError::Handshake(
                "server closed the connection after the hello (bad secret?)".into(),
            ));
        }
        Ok(tunnel)
    }
}
