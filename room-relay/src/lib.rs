//! Room-based TCP broadcast relay.
//!
//! Clients connect, send one handshake frame naming a room, and from then on
//! every frame they send is forwarded byte-for-byte to the other members of
//! that room. Payloads are never interpreted after the handshake.
//!
//! - [`frame`] reads and writes the `[u32 LE length][type][payload]` framing.
//! - [`registry`] maps rooms to their members and drops rooms when they empty.
//! - [`hub`] owns the registry on a single task and performs fan-out.
//! - [`session`] runs the inbound and outbound tasks for one connection.
//! - [`relay`] accepts TCP connections and starts sessions.
//! - [`config`] and [`cli`] describe how the relay is started.
//! - [`client`] is a small terminal participant for trying a relay out.

pub mod cli;
pub mod client;
pub mod config;
pub mod frame;
pub mod hub;
pub mod registry;
pub mod relay;
pub mod session;

pub use config::RelayConfig;
pub use frame::{Frame, FrameError, MAX_FRAME_LEN, PacketKind};
pub use hub::{Hub, HubHandle};
pub use registry::RoomId;
pub use relay::Relay;
pub use session::SessionId;
