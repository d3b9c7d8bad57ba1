//! The hub: single owner of room membership and fan-out.
//!
//! Sessions never touch the registry. They send [`Request`]s through a
//! [`HubHandle`] and one task applies them in arrival order, so the room map
//! needs no lock. The hub performs no I/O: delivery is a non-blocking push into
//! each recipient's bounded queue, and a full queue drops the packet for that
//! recipient only.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tracing::{debug, info, trace};

use crate::{
    registry::{Registry, RoomId},
    session::SessionId,
};

/// Requests processed by the hub, one at a time.
#[derive(Debug)]
pub enum Request {
    /// Add `session` to `room`. `outbound` is the producer end of the
    /// session's queue; the hub becomes its only holder.
    Register {
        session: SessionId,
        room: RoomId,
        outbound: mpsc::Sender<Bytes>,
    },
    /// Remove `session` from `room` and close its queue.
    Deregister { session: SessionId, room: RoomId },
    /// Fan `packet` out to everyone else in the sender's room.
    Broadcast { sender: SessionId, packet: Bytes },
}

/// Cloneable capability for submitting requests to a running hub.
///
/// The intake is unbounded: submitting never waits. Once the hub has stopped,
/// requests are discarded.
#[derive(Debug, Clone)]
pub struct HubHandle {
    request_tx: mpsc::UnboundedSender<Request>,
}

impl HubHandle {
    pub fn register(&self, session: SessionId, room: RoomId, outbound: mpsc::Sender<Bytes>) {
        self.submit(Request::Register {
            session,
            room,
            outbound,
        });
    }

    pub fn deregister(&self, session: SessionId, room: RoomId) {
        self.submit(Request::Deregister { session, room });
    }

    pub fn broadcast(&self, sender: SessionId, packet: Bytes) {
        self.submit(Request::Broadcast { sender, packet });
    }

    fn submit(&self, request: Request) {
        if self.request_tx.send(request).is_err() {
            debug!("hub stopped; request discarded");
        }
    }
}

/// Per-member state kept by the hub.
#[derive(Debug)]
struct Member {
    outbound: mpsc::Sender<Bytes>,
}

/// Room state plus the intake it drains.
pub struct Hub {
    rooms: Registry<Member>,
    /// Room each session most recently registered into.
    placements: HashMap<SessionId, RoomId>,
    request_rx: mpsc::UnboundedReceiver<Request>,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let hub = Self {
            rooms: Registry::new(),
            placements: HashMap::new(),
            request_rx,
        };
        (hub, HubHandle { request_tx })
    }

    /// Starts a hub on the current runtime and returns its handle.
    ///
    /// The hub task exits once every handle has been dropped.
    pub fn spawn() -> HubHandle {
        Self::spawn_with_task().0
    }

    pub fn spawn_with_task() -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new();
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            self.handle(request);
        }
        debug!("hub intake closed");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Register {
                session,
                room,
                outbound,
            } => self.register(session, room, outbound),
            Request::Deregister { session, room } => self.deregister(session, &room),
            Request::Broadcast { sender, packet } => self.broadcast(sender, packet),
        }
    }

    fn register(&mut self, session: SessionId, room: RoomId, outbound: mpsc::Sender<Bytes>) {
        let members = self.rooms.join(room.clone(), session, Member { outbound });
        info!(session = %session, room = %room, members, "client entered room");
        self.placements.insert(session, room);
    }

    fn deregister(&mut self, session: SessionId, room: &RoomId) {
        // Dropping the departed member's sender closes its queue; the
        // session's writer exits once the queue is drained.
        let Some(departure) = self.rooms.leave(room, session) else {
            trace!(session = %session, room = %room, "deregister for non-member ignored");
            return;
        };

        if self.placements.get(&session) == Some(room) {
            self.placements.remove(&session);
        }

        info!(
            session = %session,
            room = %room,
            members = departure.remaining,
            "client left room"
        );
        if departure.room_closed() {
            info!(room = %room, "room empty; removed");
        }
    }

    fn broadcast(&mut self, sender: SessionId, packet: Bytes) {
        let Some(room) = self.placements.get(&sender) else {
            trace!(session = %sender, "broadcast from session outside any room dropped");
            return;
        };

        for (recipient, member) in self.rooms.members(room) {
            if recipient == sender {
                continue;
            }
            match member.outbound.try_send(packet.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!(session = %recipient, room = %room, "outbound queue full; packet dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(session = %recipient, "outbound queue closed; packet dropped");
                }
            }
        }
    }
}
