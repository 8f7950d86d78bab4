use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use minerproxy_core::{Frame, FrameType, SessionError, SessionId, CHUNK_SIZE, SESSION_IDLE_TIMEOUT};
use minerproxy_crypto::Cipher;

use crate::Tunnel;

/// Why a session's pump loop stopped.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The local (client) or upstream (server) TCP side closed cleanly.
    LocalClosed,
    /// A `CLOSE` frame arrived, or the tunnel died / the session was
    /// unregistered out from under this pump.
    TunnelClosed,
    /// An I/O error, corrupt payload, or idle timeout ended the session.
    Error(SessionError),
}

/// Drive one session's traffic between its local TCP side (`local`, which
/// is a plaintext mining-software socket on the client or an upstream
/// pool socket on the server) and its tunnel.
///
/// Bytes read from `local` are chunked to at most [`CHUNK_SIZE`],
/// encrypted, and sent as `DATA` frames. Frames received on `inbound` are
/// decrypted and written to `local`. Either direction observing
/// end-of-stream sends `CLOSE` and ends the pump; idle sessions time out
/// after [`SESSION_IDLE_TIMEOUT`].
pub async fn pump_session<S>(
    session_id: SessionId,
    local: S,
    tunnel: Tunnel,
    mut inbound: mpsc::Receiver<Frame>,
    cipher: Cipher,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut idle_deadline = Instant::now() + SESSION_IDLE_TIMEOUT;

    loop {
        tokio::select! {
            result = local_read.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("session {session_id} local side closed");
                        let _ = tunnel.send(Frame::close(session_id)).await;
                        return SessionOutcome::LocalClosed;
                    }
                    Ok(n) => {
                        idle_deadline = Instant::now() + SESSION_IDLE_TIMEOUT;
                        let ciphertext = cipher.encrypt(&buf[..n]);
                        if tunnel.send(Frame::data(session_id, ciphertext)).await.is_err() {
                            return SessionOutcome::TunnelClosed;
                        }
                    }
                    Err(e) => {
                        warn!("session {session_id} local read error: {e}");
                        let _ = tunnel.send(Frame::close(session_id)).await;
                        return SessionOutcome::Error(SessionError::Io(e));
                    }
                }
            }
            maybe_frame = inbound.recv() => {
                let Some(frame) = maybe_frame else {
                    debug!("session {session_id} tunnel route closed");
                    return SessionOutcome::TunnelClosed;
                };
                idle_deadline = Instant::now() + SESSION_IDLE_TIMEOUT;
                match frame.frame_type {
                    FrameType::Close => {
                        debug!("session {session_id} received close");
                        return SessionOutcome::TunnelClosed;
                    }
                    FrameType::Data | FrameType::Open => {
                        if frame.payload.is_empty() {
                            continue;
                        }
                        match cipher.decrypt(&frame.payload) {
                            Ok(plaintext) => {
                                if local_write.write_all(&plaintext).await.is_err() {
                                    return SessionOutcome::LocalClosed;
                                }
                            }
                            Err(e) => {
                                warn!("session {session_id} got undecryptable payload: {e}");
                                return SessionOutcome::Error(SessionError::Corrupt(e.to_string()));
                            }
                        }
                    }
                    FrameType::Ping | FrameType::Pong => {
                        // The tunnel reader already handles keep-alive;
                        // these never reach a session route.
                    }
                }
            }
            _ = tokio::time::sleep_until(idle_deadline) => {
                debug!("session {session_id} idle for {:?}", SESSION_IDLE_TIMEOUT);
                let _ = tunnel.send(Frame::close(session_id)).await;
                return SessionOutcome::Error(SessionError::Idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    #[tokio::test]
    async fn local_bytes_are_encrypted_and_forwarded_as_data_frames() {
        let (tunnel_side_a, tunnel_side_b) = connected_pair().await;
        let (tunnel_a, _unrouted_a) = Tunnel::spawn(tunnel_side_a, CancellationToken::new());
        let (tunnel_b, _unrouted_b) = Tunnel::spawn(tunnel_side_b, CancellationToken::new());

        let session_id = SessionId::generate();
        let inbound_on_b = tunnel_b.register_session(session_id);
        let inbound_on_a = tunnel_a.register_session(session_id);
        let cipher = Cipher::from_secret("abcdefghijklmnop");

        let (local_near, mut local_far) = duplex(4096);

        let pump_handle = tokio::spawn(pump_session(
            session_id,
            local_near,
            tunnel_a,
            inbound_on_a,
            cipher.clone(),
        ));

        local_far.write_all(b"hello-pool\n").await.unwrap();

        // Drain the encrypted frame on the b side and confirm it decrypts
        // back to the original bytes.
        let mut inbound_on_b = inbound_on_b;
        let frame = inbound_on_b.recv().await.unwrap();
        let plaintext = cipher.decrypt(&frame.payload).unwrap();
        assert_eq!(plaintext, b"hello-pool\n");

        drop(local_far);
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), pump_handle).await;
    }

    #[tokio::test]
    async fn undecryptable_payload_ends_session_with_corrupt_error() {
        let (tunnel_side_a, tunnel_side_b) = connected_pair().await;
        let (tunnel_a, _unrouted_a) = Tunnel::spawn(tunnel_side_a, CancellationToken::new());
        let (tunnel_b, _unrouted_b) = Tunnel::spawn(tunnel_side_b, CancellationToken::new());

        let session_id = SessionId::generate();
        let inbound_on_a = tunnel_a.register_session(session_id);
        let _inbound_on_b = tunnel_b.register_session(session_id);
        let cipher = Cipher::from_secret("abcdefghijklmnop");

        let (local_near, _local_far) = duplex(4096);
        let pump_handle = tokio::spawn(pump_session(
            session_id,
            local_near,
            tunnel_a,
            inbound_on_a,
            cipher,
        ));

        // Garbage ciphertext that won't unpad cleanly.
        tunnel_b
            .send(Frame::data(session_id, vec![0u8; 16]))
            .await
            .unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(2), pump_handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, SessionOutcome::Error(SessionError::Corrupt(_))));
    }
}
