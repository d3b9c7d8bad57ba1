//! Length-prefixed packet framing.
//!
//! Wire format: `[length: u32 little-endian][type: u8][payload: length - 1 bytes]`.
//! `length` counts the type byte plus the payload, never the length field itself.
//! A frame keeps its raw encoded bytes so the relay can forward it untouched.

use std::{fmt, io};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the little-endian length prefix.
pub const HEADER_LEN: usize = 4;

/// Largest accepted value of the length field (1 MiB).
pub const MAX_FRAME_LEN: u32 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,

    #[error("stream ended in the middle of a frame")]
    ShortRead,

    #[error("empty frame")]
    Empty,

    #[error("frame too large: {len} bytes (max {max})")]
    TooLarge { len: u64, max: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the peer hung up cleanly between two frames.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, FrameError::Closed)
    }
}

/// Packet tags used by drawing clients. The relay only ever looks at
/// [`PacketKind::Handshake`]; everything after the handshake is opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    Handshake,
    Draw,
    Chat,
    Clear,
    Other(u8),
}

impl PacketKind {
    pub fn tag(self) -> u8 {
        match self {
            PacketKind::Handshake => 0x00,
            PacketKind::Draw => 0x01,
            PacketKind::Chat => 0x02,
            PacketKind::Clear => 0x03,
            PacketKind::Other(tag) => tag,
        }
    }
}

impl From<u8> for PacketKind {
    fn from(tag: u8) -> Self {
        match tag {
            0x00 => PacketKind::Handshake,
            0x01 => PacketKind::Draw,
            0x02 => PacketKind::Chat,
            0x03 => PacketKind::Clear,
            other => PacketKind::Other(other),
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketKind::Handshake => f.write_str("handshake"),
            PacketKind::Draw => f.write_str("draw"),
            PacketKind::Chat => f.write_str("chat"),
            PacketKind::Clear => f.write_str("clear"),
            PacketKind::Other(tag) => write!(f, "0x{tag:02x}"),
        }
    }
}

/// One complete frame, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Builds a frame from a packet kind and payload.
    pub fn new(kind: PacketKind, payload: &[u8]) -> Result<Self, FrameError> {
        let len = payload.len() as u64 + 1;
        if len > u64::from(MAX_FRAME_LEN) {
            return Err(FrameError::TooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }

        let mut raw = BytesMut::with_capacity(HEADER_LEN + len as usize);
        raw.put_u32_le(len as u32);
        raw.put_u8(kind.tag());
        raw.put_slice(payload);
        Ok(Self { raw: raw.freeze() })
    }

    /// Builds the handshake that asks to join `room`.
    pub fn handshake(room: &[u8]) -> Result<Self, FrameError> {
        Self::new(PacketKind::Handshake, room)
    }

    /// Value of the length field: type byte plus payload.
    #[cfg(test)]
    pub fn declared_len(&self) -> u32 {
        (self.raw.len() - HEADER_LEN) as u32
    }

    pub fn tag(&self) -> u8 {
        self.raw[HEADER_LEN]
    }

    pub fn kind(&self) -> PacketKind {
        PacketKind::from(self.tag())
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[HEADER_LEN + 1..]
    }

    /// Payload as a zero-copy slice of the frame buffer.
    pub fn payload_bytes(&self) -> Bytes {
        self.raw.slice(HEADER_LEN + 1..)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw
    }
}

/// Reads exactly one frame.
///
/// The length prefix is validated against `max_len` before the body buffer is
/// allocated, so a forged length cannot force a large allocation.
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_header(reader, &mut header).await?;

    let len = u32::from_le_bytes(header);
    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > max_len {
        return Err(FrameError::TooLarge {
            len: u64::from(len),
            max: max_len,
        });
    }

    let mut raw = BytesMut::zeroed(HEADER_LEN + len as usize);
    raw[..HEADER_LEN].copy_from_slice(&header);
    reader
        .read_exact(&mut raw[HEADER_LEN..])
        .await
        .map_err(map_eof(FrameError::ShortRead))?;

    Ok(Frame { raw: raw.freeze() })
}

/// Fills the length prefix, telling a clean hang-up apart from a cut header.
async fn read_header<R>(reader: &mut R, header: &mut [u8; HEADER_LEN]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < HEADER_LEN {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            return Err(if filled == 0 {
                FrameError::Closed
            } else {
                FrameError::ShortRead
            });
        }
        filled += read;
    }
    Ok(())
}

fn map_eof(on_eof: FrameError) -> impl FnOnce(io::Error) -> FrameError {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            on_eof
        } else {
            FrameError::Io(err)
        }
    }
}

/// Writes a frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    write_packet(writer, frame.as_bytes()).await
}

/// Writes an already-encoded packet in full and flushes it.
pub async fn write_packet<W>(writer: &mut W, packet: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(packet).await?;
    writer.flush().await?;
    Ok(())
}
