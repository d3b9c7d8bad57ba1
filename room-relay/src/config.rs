//! Runtime settings for the relay.

use std::net::SocketAddr;

use anyhow::{Result, ensure};

use crate::{cli::ServeArgs, frame::MAX_FRAME_LEN, session::SessionLimits};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:9000";

/// Packets buffered per client before the hub starts dropping for it.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub queue_capacity: usize,
    pub max_frame_len: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9000)),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

impl RelayConfig {
    pub fn from_args(args: &ServeArgs) -> Result<Self> {
        let config = Self {
            listen: args.listen,
            queue_capacity: args.queue_capacity,
            max_frame_len: args.max_frame_len,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.queue_capacity > 0, "queue capacity must be at least 1");
        ensure!(self.max_frame_len > 0, "max frame length must be at least 1");
        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            queue_capacity: self.queue_capacity,
            max_frame_len: self.max_frame_len,
        }
    }
}
