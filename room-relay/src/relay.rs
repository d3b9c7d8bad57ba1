use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    hub::{Hub, HubHandle},
    session::{Session, SessionId, SessionLimits},
};

/// Accepts connections and hands each one to a new session.
pub struct Relay {
    listener: TcpListener,
    limits: SessionLimits,
}

impl Relay {
    pub fn new(listener: TcpListener, config: &RelayConfig) -> Self {
        Self {
            listener,
            limits: config.session_limits(),
        }
    }

    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        Ok(Self::new(listener, config))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves. Sessions already running are left to
    /// finish on their own; the hub lives until the last of them exits.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, limits } = self;
        let hub = Hub::spawn();
        let mut next_id = 1u64;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay no longer accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    if let Some((stream, peer)) = handle_accept_result(accept_result) {
                        let id = SessionId::new(next_id);
                        next_id += 1;
                        start_session(id, stream, peer, &hub, limits);
                    }
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
) -> Option<(TcpStream, SocketAddr)> {
    match result {
        Ok(accepted) => Some(accepted),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            None
        }
    }
}

fn start_session(
    id: SessionId,
    stream: TcpStream,
    peer: SocketAddr,
    hub: &HubHandle,
    limits: SessionLimits,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = ?err, "failed to set TCP_NODELAY");
    }
    debug!(session = %id, peer = %peer, "connection accepted");

    // Both session tasks run detached; the inbound task logs when the session ends.
    Session::new(id, stream, hub.clone(), limits).spawn();
}
