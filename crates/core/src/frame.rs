use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TunnelError;
use crate::session::{SessionId, SESSION_ID_LEN};

/// Hard cap on a frame's remainder length. Anything larger is treated as a
/// corrupt frame rather than an attempt to read an unbounded amount of
/// attacker-controlled data into memory.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// `4` (length prefix) + `1` (type tag) + session id width.
const FRAME_HEADER_LEN: usize = 4 + 1 + SESSION_ID_LEN;

/// The one-byte type tag of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Carries encrypted payload for an open session.
    Data = 0x01,
    /// Announces a new session id; empty payload (or the handshake hello).
    Open = 0x02,
    /// Signals normal termination of the session.
    Close = 0x03,
    /// Keep-alive probe; empty payload.
    Ping = 0x04,
    /// Keep-alive response; empty payload.
    Pong = 0x05,
}

impl FrameType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(FrameType::Data),
            0x02 => Some(FrameType::Open),
            0x03 => Some(FrameType::Close),
            0x04 => Some(FrameType::Ping),
            0x05 => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// One length-prefixed, typed, session-tagged wire record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub session_id: SessionId,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn data(session_id: SessionId, payload: Vec<u8>) -> Self {
        Frame { frame_type: FrameType::Data, session_id, payload }
    }

    pub fn open(session_id: SessionId, payload: Vec<u8>) -> Self {
        Frame { frame_type: FrameType::Open, session_id, payload }
    }

    pub fn close(session_id: SessionId) -> Self {
        Frame { frame_type: FrameType::Close, session_id, payload: Vec::new() }
    }

    pub fn ping() -> Self {
        Frame { frame_type: FrameType::Ping, session_id: SessionId::HANDSHAKE, payload: Vec::new() }
    }

    pub fn pong() -> Self {
        Frame { frame_type: FrameType::Pong, session_id: SessionId::HANDSHAKE, payload: Vec::new() }
    }

    fn remainder_len(&self) -> usize {
        1 + SESSION_ID_LEN + self.payload.len()
    }
}

/// Read exactly one frame from `reader`.
///
/// Returns `Ok(None)` on a clean end-of-stream that falls exactly on a
/// frame boundary (no partial frame seen). Any other truncation, or a
/// remainder length exceeding [`MAX_FRAME_LEN`], is reported as
/// [`TunnelError::CorruptFrame`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, TunnelError> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(reader, &mut len_buf).await? {
        ReadExact::Eof => return Ok(None),
        ReadExact::Filled => {}
    }

    let remainder_len = u32::from_be_bytes(len_buf);
    if remainder_len > MAX_FRAME_LEN {
        return Err(TunnelError::CorruptFrame(format!(
            "frame remainder length {remainder_len} exceeds cap {MAX_FRAME_LEN}"
        )));
    }
    if (remainder_len as usize) < 1 + SESSION_ID_LEN {
        return Err(TunnelError::CorruptFrame(format!(
            "frame remainder length {remainder_len} is smaller than the minimum {}",
            1 + SESSION_ID_LEN
        )));
    }

    let mut rest = vec![0u8; remainder_len as usize];
    reader
        .read_exact(&mut rest)
        .await
        .map_err(|e| TunnelError::CorruptFrame(format!("truncated frame body: {e}")))?;

    let frame_type = FrameType::from_u8(rest[0])
        .ok_or_else(|| TunnelError::CorruptFrame(format!("unknown frame type {:#04x}", rest[0])))?;

    let mut session_id = [0u8; SESSION_ID_LEN];
    session_id.copy_from_slice(&rest[1..1 + SESSION_ID_LEN]);

    let payload = rest[1 + SESSION_ID_LEN..].to_vec();

    Ok(Some(Frame {
        frame_type,
        session_id: SessionId::from_bytes(session_id),
        payload,
    }))
}

/// Write exactly one frame to `writer`.
///
/// Callers must ensure only one task ever writes to a given tunnel's
/// writer half at a time, so that frame bytes are never interleaved.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), TunnelError> {
    let remainder_len = frame.remainder_len() as u32;
    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + frame.payload.len());
    buf.extend_from_slice(&remainder_len.to_be_bytes());
    buf.push(frame.frame_type as u8);
    buf.extend_from_slice(frame.session_id.as_bytes());
    buf.extend_from_slice(&frame.payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

enum ReadExact {
    Eof,
    Filled,
}

/// Like `AsyncReadExt::read_exact`, but distinguishes "zero bytes read,
/// clean EOF" from "some bytes read, then EOF" (the latter is corruption).
async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<ReadExact, TunnelError> {
    let mut filled = 0;
    loop {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Ok(ReadExact::Eof)
            } else {
                Err(TunnelError::CorruptFrame("eof inside frame length prefix".into()))
            };
        }
        filled += n;
        if filled == buf.len() {
            return Ok(ReadExact::Filled);
        }
    }
}
