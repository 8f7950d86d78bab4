use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use minerproxy_core::{Frame, SessionError, SessionId};
use minerproxy_crypto::Cipher;
use minerproxy_tunnel::{pump_session, SessionOutcome, Tunnel};

/// Open the upstream pool connection for a newly discovered session and
/// run its byte-pump until either side closes.
///
/// `seed` is the frame that revealed this session (an `OPEN` or the
/// first `DATA`); it arrived on the tunnel's unrouted channel before any
/// route existed and is replayed into the session's inbound queue.
pub(crate) async fn serve_session(
    session_id: SessionId,
    seed: Frame,
    tunnel: Tunnel,
    upstream_addr: SocketAddr,
    cipher: Cipher,
) {
    let inbound = tunnel.register_session_seeded(session_id, seed);

    let upstream = match TcpStream::connect(upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            let e = SessionError::UpstreamUnreachable(format!("{upstream_addr}: {e}"));
            warn!("session {session_id} could not reach upstream: {e}");
            let _ = tunnel.send(Frame::close(session_id)).await;
            tunnel.unregister_session(session_id);
            return;
        }
    };

    debug!("session {session_id} connected to upstream {upstream_addr}");
    let outcome = pump_session(session_id, upstream, tunnel.clone(), inbound, cipher).await;
    match &outcome {
        SessionOutcome::Error(e) => warn!("session {session_id} ended with error: {e}"),
        other => debug!("session {session_id} ended: {other:?}"),
    }
    tunnel.unregister_session(session_id);
}
