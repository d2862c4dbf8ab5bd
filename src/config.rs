use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

/// Configuration of a tunnel server instance. All values are fixed at startup; tunnels that
///  are accepted later pick up the values that were in effect when the server was created.
pub struct ServerConfig {
    /// The address the HTTP front-end listens on for websocket upgrades.
    pub listen_addr: SocketAddr,

    /// The number of request slots per tunnel, i.e. the maximum number of concurrent egress
    ///  connections a single client can multiplex over one websocket. The peer addresses slots
    ///  by index, so this value must match the peer's configuration.
    pub slots_per_tunnel: u16,

    /// Period of the keepalive ticker. A tunnel that has seen no inbound traffic for longer
    ///  than this is sent a ping on each tick.
    pub keepalive_interval: Duration,

    /// Number of unanswered pings after which a tunnel is considered dead and closed.
    pub max_missed_pongs: u32,

    /// Upper bound for a single inbound frame. Longer frames are treated as a protocol error
    ///  and dropped.
    pub max_frame_len: usize,
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            listen_addr,
            slots_per_tunnel: 100,
            keepalive_interval: Duration::from_millis(10_000),
            max_missed_pongs: 3,
            max_frame_len: 16 * 1024 * 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.slots_per_tunnel == 0 {
            bail!("a tunnel needs at least one request slot");
        }
        if self.keepalive_interval.is_zero() {
            bail!("keepalive interval must not be zero");
        }
        if self.max_frame_len < 64 {
            bail!("max frame length is too small to hold a request frame");
        }
        Ok(())
    }
}
