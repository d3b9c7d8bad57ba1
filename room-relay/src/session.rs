//! Per-connection session: one inbound task and one outbound task.
//!
//! The inbound task performs the handshake, registers with the hub and turns
//! every following frame into a broadcast request. The outbound task drains
//! the session's bounded queue onto the socket. The two run as separate tokio
//! tasks so a blocked socket read never holds up queued writes.

use std::fmt;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    select,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    frame::{FrameError, PacketKind, read_frame, write_packet},
    hub::HubHandle,
    registry::RoomId,
};

/// Opaque identity of one connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("handshake read failed: {0}")]
    Frame(#[from] FrameError),

    #[error("expected handshake packet, got type 0x{0:02x}")]
    UnexpectedType(u8),
}

/// Settings a session needs from the relay configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub queue_capacity: usize,
    pub max_frame_len: u32,
}

/// A connection that has not been started yet.
pub struct Session<S> {
    id: SessionId,
    stream: S,
    hub: HubHandle,
    limits: SessionLimits,
}

/// Join handles for a running session's two tasks.
pub struct SessionTasks {
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl SessionTasks {
    /// Waits until both paths have exited and the connection is released.
    pub async fn join(self) {
        if let Err(err) = self.inbound.await {
            warn!(error = ?err, "session inbound task failed");
        }
        if let Err(err) = self.outbound.await {
            warn!(error = ?err, "session outbound task failed");
        }
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(id: SessionId, stream: S, hub: HubHandle, limits: SessionLimits) -> Self {
        Self {
            id,
            stream,
            hub,
            limits,
        }
    }

    /// Starts the inbound and outbound tasks.
    pub fn spawn(self) -> SessionTasks {
        let Session {
            id,
            stream,
            hub,
            limits,
        } = self;

        let (reader, writer) = tokio::io::split(stream);
        let (queue_tx, queue_rx) = mpsc::channel(limits.queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();
        let (writer_done_tx, writer_done_rx) = oneshot::channel();

        let outbound = tokio::spawn(run_outbound(id, writer, queue_rx, stop_rx, writer_done_tx));
        let inbound = tokio::spawn(async move {
            let mut inbound = Inbound {
                id,
                reader,
                hub,
                max_frame_len: limits.max_frame_len,
                writer_done: writer_done_rx,
            };
            inbound.run(queue_tx).await;
            let _ = stop_tx.send(());
            drop(inbound);
            debug!(session = %id, "session finished");
        });

        SessionTasks { inbound, outbound }
    }
}

struct Inbound<S> {
    id: SessionId,
    reader: ReadHalf<S>,
    hub: HubHandle,
    max_frame_len: u32,
    /// Resolves once the outbound task has exited.
    writer_done: oneshot::Receiver<()>,
}

impl<S> Inbound<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Runs until the connection ends. `queue` becomes the hub's producer end
    /// once the handshake succeeds; on failure it is dropped unused.
    async fn run(&mut self, queue: mpsc::Sender<Bytes>) {
        let room = match self.handshake().await {
            Ok(room) => room,
            Err(err) => {
                warn!(session = %self.id, error = %err, "handshake failed");
                return;
            }
        };

        info!(session = %self.id, room = %room, "session joined room");
        self.hub.register(self.id, room.clone(), queue);

        self.relay_frames().await;

        self.hub.deregister(self.id, room);
    }

    async fn handshake(&mut self) -> Result<RoomId, HandshakeError> {
        let frame = read_frame(&mut self.reader, self.max_frame_len).await?;
        if frame.kind() != PacketKind::Handshake {
            return Err(HandshakeError::UnexpectedType(frame.tag()));
        }
        Ok(RoomId::new(frame.payload_bytes()))
    }

    async fn relay_frames(&mut self) {
        loop {
            let result = select! {
                result = read_frame(&mut self.reader, self.max_frame_len) => result,
                _ = &mut self.writer_done => {
                    debug!(session = %self.id, "writer exited; ending session");
                    break;
                }
            };
            match result {
                Ok(frame) => self.hub.broadcast(self.id, frame.into_bytes()),
                Err(err) if err.is_clean_close() => {
                    debug!(session = %self.id, "peer closed connection");
                    break;
                }
                Err(err) => {
                    warn!(session = %self.id, error = %err, "read failed");
                    break;
                }
            }
        }
    }
}

/// Writes queued packets until told to stop, the queue closes, or a write fails.
/// `done` fires on exit so a failed write also ends the inbound task.
async fn run_outbound<S>(
    id: SessionId,
    mut writer: WriteHalf<S>,
    mut queue: mpsc::Receiver<Bytes>,
    mut stop: oneshot::Receiver<()>,
    done: oneshot::Sender<()>,
) where
    S: AsyncRead + AsyncWrite,
{
    loop {
        select! {
            packet = queue.recv() => {
                let Some(packet) = packet else {
                    debug!(session = %id, "outbound queue closed");
                    break;
                };
                if let Err(err) = write_packet(&mut writer, &packet).await {
                    debug!(session = %id, error = %err, "write failed");
                    break;
                }
            }
            _ = &mut stop => {
                debug!(session = %id, "outbound stopped");
                break;
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(session = %id, error = %err, "connection shutdown failed");
    }
    let _ = done.send(());
}
