use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use minerproxy_core::{Frame, SessionId};
use minerproxy_crypto::Cipher;
use minerproxy_tunnel::{pump_session, SessionOutcome};

use crate::{ClientError, TunnelPool};

/// Accepts plaintext TCP connections on one local port and hands each one
/// to the least-loaded tunnel in `pool` as a new session.
pub struct ClientListener {
    listen_addr: SocketAddr,
    pool: TunnelPool,
    cipher: Cipher,
    cancel: CancellationToken,
}

impl ClientListener {
    pub fn new(listen_addr: SocketAddr, pool: TunnelPool, cipher: Cipher, cancel: CancellationToken) -> Self {
        ClientListener { listen_addr, pool, cipher, cancel }
    }

    /// Run the accept loop. Returns on a listener-level I/O error, or
    /// cleanly once `cancel` fires.
    pub async fn serve(self) -> Result<(), ClientError> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        info!("client listener accepting on {}", self.listen_addr);

        loop {
            let (stream, peer_addr) = tokio::select! {
                result = listener.accept() => result?,
                _ = self.cancel.cancelled() => {
                    debug!("client listener on {} stopping for shutdown", self.listen_addr);
                    return Ok(());
                }
            };
            let pool = self.pool.clone();
            let cipher = self.cipher.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, pool, cipher).await {
                    debug!("session from {peer_addr} ended: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        local: TcpStream,
        pool: TunnelPool,
        cipher: Cipher,
    ) -> Result<(), ClientError> {
        let tunnel = pool.pick()?;
        let session_id = SessionId::generate();
        let inbound = tunnel.register_session(session_id);

        tunnel.send(Frame::open(session_id, Vec::new())).await?;
        debug!("session {session_id} opened on tunnel with {} sessions", tunnel.session_count());

        let outcome = pump_session(session_id, local, tunnel.clone(), inbound, cipher).await;
        tunnel.unregister_session(session_id);
        match outcome {
            SessionOutcome::LocalClosed => {}
            SessionOutcome::TunnelClosed => debug!("session {session_id} ended: tunnel closed"),
            SessionOutcome::Error(e) => warn!("session {session_id} ended with error: {e}"),
        }
        Ok(())
    }
}
