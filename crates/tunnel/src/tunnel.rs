use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use minerproxy_core::{
    read_frame, write_frame, Frame, FrameType, SessionId, TunnelError, PING_INTERVAL,
    TUNNEL_IDLE_TIMEOUT,
};

/// How many frames a tunnel's outbound queue may hold before `send` blocks
/// the caller. Provides the cooperative back-pressure §5 calls for.
const SEND_QUEUE_DEPTH: usize = 256;

/// How many in-flight frames a session's inbound queue may hold.
const SESSION_QUEUE_DEPTH: usize = 64;

struct Inner {
    send_tx: mpsc::Sender<Frame>,
    sessions: Mutex<HashMap<SessionId, mpsc::Sender<Frame>>>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    sequence: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    dead: AtomicBool,
    closed: tokio::sync::Notify,
    reader_abort: Mutex<Option<tokio::task::AbortHandle>>,
    writer_abort: Mutex<Option<tokio::task::AbortHandle>>,
}

impl Inner {
    fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Declare the tunnel dead: future `send`/`register_session` calls
    /// fail or return an already-closed channel, and every registered
    /// session's inbound sender is dropped so the session's pump task
    /// observes `recv() == None` and tears itself down.
    fn mark_dead(&self) {
        if self.dead.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sessions.lock().unwrap().clear();
        self.closed.notify_waiters();
    }
}

/// A single authenticated, long-lived TCP connection multiplexing frames
/// for many sessions. Cheap to clone; clones share the same underlying
/// connection and session table.
#[derive(Clone)]
pub struct Tunnel {
    inner: std::sync::Arc<Inner>,
}

impl Tunnel {
    /// Take ownership of an already-handshaked TCP connection and spawn
    /// its reader and writer tasks.
    ///
    /// `cancel` is the process-wide shutdown token: when it fires, both
    /// tasks stop at their next select point and the tunnel is declared
    /// dead, same as an idle timeout or I/O error. Pass
    /// `CancellationToken::new()` for a tunnel that should only ever be
    /// torn down via [`Tunnel::close`] or a real connection failure.
    ///
    /// Returns the tunnel handle plus a receiver for frames that arrive
    /// tagged with a session id nobody has registered yet — the server
    /// listener uses this to discover newly opened sessions (`OPEN`, or
    /// a `DATA` frame whose session id it has never seen).
    pub fn spawn(stream: TcpStream, cancel: CancellationToken) -> (Tunnel, mpsc::Receiver<Frame>) {
        let (read_half, write_half) = stream.into_split();
        let (send_tx, send_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (unrouted_tx, unrouted_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);

        let inner = std::sync::Arc::new(Inner {
            send_tx: send_tx.clone(),
            sessions: Mutex::new(HashMap::new()),
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            sequence: AtomicU64::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            dead: AtomicBool::new(false),
            closed: tokio::sync::Notify::new(),
            reader_abort: Mutex::new(None),
            writer_abort: Mutex::new(None),
        });

        let tunnel = Tunnel { inner: inner.clone() };

        let reader_inner = inner.clone();
        let reader_task: JoinHandle<()> = tokio::spawn(Self::reader_loop(
            reader_inner,
            read_half,
            send_tx.clone(),
            unrouted_tx,
            cancel.clone(),
        ));
        let writer_inner = inner.clone();
        let writer_task: JoinHandle<()> =
            tokio::spawn(Self::writer_loop(writer_inner, write_half, send_rx, cancel));

        *inner.reader_abort.lock().unwrap() = Some(reader_task.abort_handle());
        *inner.writer_abort.lock().unwrap() = Some(writer_task.abort_handle());

        tokio::spawn(Self::supervise(inner, reader_task, writer_task));

        (tunnel, unrouted_rx)
    }

    /// Enqueue a frame for writing. Blocks the caller when the tunnel's
    /// send queue is full; fails immediately once the tunnel is dead.
    pub async fn send(&self, frame: Frame) -> Result<(), TunnelError> {
        if self.inner.dead.load(Ordering::SeqCst) {
            return Err(TunnelError::Dead);
        }
        self.inner
            .send_tx
            .send(frame)
            .await
            .map_err(|_| TunnelError::Dead)
    }

    /// Register a route for `session_id` on this tunnel, returning the
    /// receiver end that the session's pump task polls for inbound
    /// frames. If the tunnel is already dead, the returned receiver is
    /// immediately exhausted.
    pub fn register_session(&self, session_id: SessionId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        if !self.inner.dead.load(Ordering::SeqCst) {
            self.inner.sessions.lock().unwrap().insert(session_id, tx);
        }
        rx
    }

    /// Like [`Tunnel::register_session`], but seeds the new route's queue
    /// with `seed` first. The server listener uses this for the frame
    /// that triggered session creation: it already came out of the
    /// unrouted-frame channel before any route existed for it.
    pub fn register_session_seeded(&self, session_id: SessionId, seed: Frame) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let _ = tx.try_send(seed);
        if !self.inner.dead.load(Ordering::SeqCst) {
            self.inner.sessions.lock().unwrap().insert(session_id, tx);
        }
        rx
    }

    pub fn unregister_session(&self, session_id: SessionId) {
        self.inner.sessions.lock().unwrap().remove(&session_id);
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    pub fn is_dead(&self) -> bool {
        self.inner.dead.load(Ordering::SeqCst)
    }

    /// Whether `self` and `other` are handles to the same underlying
    /// connection, as opposed to two distinct tunnels that merely compare
    /// equal in some other sense.
    pub fn ptr_eq(&self, other: &Tunnel) -> bool {
        std::sync::Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Forcibly tear down this tunnel: aborts its reader and writer
    /// tasks and declares it dead. Used by the server listener to drop
    /// a connection whose handshake failed.
    pub fn close(&self) {
        if let Some(h) = self.inner.reader_abort.lock().unwrap().as_ref() {
            h.abort();
        }
        if let Some(h) = self.inner.writer_abort.lock().unwrap().as_ref() {
            h.abort();
        }
        self.inner.mark_dead();
    }

    /// Resolve once the tunnel has been declared dead. Resolves
    /// immediately if it already is.
    pub async fn closed(&self) {
        loop {
            if self.inner.dead.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.inner.closed.notified();
            if self.inner.dead.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock().unwrap()
    }

    /// Number of frames written on this tunnel so far. Logging only.
    pub fn frames_written(&self) -> u64 {
        self.inner.sequence.load(Ordering::Relaxed)
    }

    /// Wire bytes read from this tunnel's socket so far (encrypted
    /// frame bytes, not plaintext session bytes). Stats only.
    pub fn bytes_in(&self) -> u64 {
        self.inner.bytes_in.load(Ordering::Relaxed)
    }

    /// Wire bytes written to this tunnel's socket so far.
    pub fn bytes_out(&self) -> u64 {
        self.inner.bytes_out.load(Ordering::Relaxed)
    }

    async fn supervise(
        inner: std::sync::Arc<Inner>,
        reader_task: JoinHandle<()>,
        writer_task: JoinHandle<()>,
    ) {
        tokio::select! {
            _ = reader_task => { writer_task.abort(); }
            _ = writer_task => { reader_task.abort(); }
        }

        inner.mark_dead();
        debug!("tunnel declared dead");
    }

    async fn reader_loop(
        inner: std::sync::Arc<Inner>,
        mut reader: OwnedReadHalf,
        send_tx: mpsc::Sender<Frame>,
        unrouted_tx: mpsc::Sender<Frame>,
        cancel: CancellationToken,
    ) {
        loop {
            let frame = tokio::select! {
                result = tokio::time::timeout(TUNNEL_IDLE_TIMEOUT, read_frame(&mut reader)) => match result {
                    Ok(Ok(Some(frame))) => frame,
                    Ok(Ok(None)) => {
                        debug!("tunnel reader observed clean eof");
                        return;
                    }
                    Ok(Err(e)) => {
                        warn!("tunnel reader error: {e}");
                        return;
                    }
                    Err(_elapsed) => {
                        debug!("tunnel idle for {:?}, declaring dead", TUNNEL_IDLE_TIMEOUT);
                        return;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!("tunnel reader stopping for shutdown");
                    return;
                }
            };

            inner.touch();
            inner.bytes_in.fetch_add(frame.payload.len() as u64, Ordering::Relaxed);

            match frame.frame_type {
                FrameType::Ping => {
                    trace!("replying to ping with pong");
                    if send_tx.send(Frame::pong()).await.is_err() {
                        return;
                    }
                }
                FrameType::Pong => {
                    // Activity already recorded above; nothing else to do.
                }
                FrameType::Data | FrameType::Open | FrameType::Close => {
                    let routed_to = inner.sessions.lock().unwrap().get(&frame.session_id).cloned();
                    match routed_to {
                        Some(tx) => {
                            if tx.send(frame).await.is_err() {
                                // Session pump already gone; drop silently.
                            }
                        }
                        None => {
                            if unrouted_tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    async fn writer_loop(
        inner: std::sync::Arc<Inner>,
        mut writer: OwnedWriteHalf,
        mut send_rx: mpsc::Receiver<Frame>,
        cancel: CancellationToken,
    ) {
        let mut next_ping = Instant::now() + PING_INTERVAL;
        loop {
            tokio::select! {
                maybe_frame = send_rx.recv() => {
                    let Some(frame) = maybe_frame else {
                        debug!("tunnel send queue closed");
                        return;
                    };
                    inner.bytes_out.fetch_add(frame.payload.len() as u64, Ordering::Relaxed);
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        warn!("tunnel writer error: {e}");
                        return;
                    }
                    inner.sequence.fetch_add(1, Ordering::Relaxed);
                    next_ping = Instant::now() + PING_INTERVAL;
                }
                _ = tokio::time::sleep_until(next_ping) => {
                    if let Err(e) = write_frame(&mut writer, &Frame::ping()).await {
                        warn!("tunnel writer error sending keep-alive: {e}");
                        return;
                    }
                    inner.sequence.fetch_add(1, Ordering::Relaxed);
                    next_ping = Instant::now() + PING_INTERVAL;
                }
                _ = cancel.cancelled() => {
                    debug!("tunnel writer stopping for shutdown");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minerproxy_core::SessionId;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    #[tokio::test]
    async fn send_and_route_data_frame() {
        let (a, b) = connected_pair().await;
        let (tunnel_a, _unrouted_a) = Tunnel::spawn(a, CancellationToken::new());
        let (tunnel_b, _unrouted_b) = Tunnel::spawn(b, CancellationToken::new());

        let session_id = SessionId::generate();
        let mut inbound = tunnel_b.register_session(session_id);

        tunnel_a
            .send(Frame::data(session_id, b"hello".to_vec()))
            .await
            .unwrap();

        let frame = inbound.recv().await.unwrap();
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn closed_resolves_after_peer_drops() {
        let (a, b) = connected_pair().await;
        let (tunnel_a, _unrouted_a) = Tunnel::spawn(a, CancellationToken::new());
        let (tunnel_b, unrouted_b) = Tunnel::spawn(b, CancellationToken::new());

        // Dropping the handle alone would not close the socket: the
        // reader/writer tasks hold their own half of it independently of
        // any `Tunnel` clone. Closing explicitly is what actually ends
        // the connection the peer observes as EOF.
        tunnel_b.close();
        drop(tunnel_b);
        drop(unrouted_b);

        tokio::time::timeout(std::time::Duration::from_secs(2), tunnel_a.closed())
            .await
            .expect("closed() should resolve once the peer disappears");
        assert!(tunnel_a.is_dead());

        // Already-dead tunnels resolve closed() immediately.
        tunnel_a.closed().await;
    }

    #[tokio::test]
    async fn dead_tunnel_drops_sessions() {
        let (a, b) = connected_pair().await;
        let (tunnel_a, _unrouted_a) = Tunnel::spawn(a, CancellationToken::new());
        let (tunnel_b, _unrouted_b) = Tunnel::spawn(b, CancellationToken::new());

        let session_id = SessionId::generate();
        let mut inbound = tunnel_a.register_session(session_id);

        tunnel_b.close();
        drop(tunnel_b);
        drop(_unrouted_b);

        // Closing the peer's side should eventually be observed as eof,
        // which drops the session route.
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), inbound.recv()).await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrouted_frame_surfaces_to_new_session_channel() {
        let (a, b) = connected_pair().await;
        let (tunnel_a, _unrouted_a) = Tunnel::spawn(a, CancellationToken::new());
        let (_tunnel_b, mut unrouted_b) = Tunnel::spawn(b, CancellationToken::new());

        let session_id = SessionId::generate();
        tunnel_a
            .send(Frame::open(session_id, Vec::new()))
            .await
            .unwrap();

        let frame = unrouted_b.recv().await.unwrap();
        assert_eq!(frame.session_id, session_id);
        assert_eq!(frame.frame_type, FrameType::Open);
    }
}
