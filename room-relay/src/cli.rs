use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

use crate::{config, frame::MAX_FRAME_LEN};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections and forwarding packets between room members.
    Serve(ServeArgs),
    /// Join a room and exchange chat packets from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = config::DEFAULT_LISTEN)]
    pub listen: SocketAddr,

    /// Packets buffered per client before further packets to it are dropped.
    #[arg(long, default_value_t = config::DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Largest accepted length field (type byte plus payload), in bytes.
    #[arg(long, default_value_t = MAX_FRAME_LEN)]
    pub max_frame_len: u32,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Room to join.
    #[arg(long)]
    pub room: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:9000")]
    pub server: SocketAddr,
}
