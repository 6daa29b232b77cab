//! Monitor configuration.

use crate::error::{MonitorError, Result};
use crate::protocol::{COMMAND_PORT, GDL90_PORT, ProtocolMode};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

/// Quiet interval after which a channel is reported stale.
pub const LIVE_WINDOW: Duration = Duration::from_millis(2000);
/// Upper bound on a single receive wait.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(2000);
/// Datagrams larger than this are truncated; only the first bytes matter.
pub const RECV_BUFFER_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Port GDL-90 traffic arrives on.
    pub listen_port: u16,

    /// Multicast group to join on top of the broadcast bind.
    pub multicast_group: Option<Ipv4Addr>,

    /// Port control datagrams are sent to.
    pub command_port: u16,

    /// Fixed destination for control datagrams. `None` uses the /24
    /// broadcast address of the local interface.
    pub command_target: Option<SocketAddrV4>,

    pub live_window: Duration,

    pub poll_timeout: Duration,

    pub buffer_len: usize,

    /// Mode sent once at startup, mirroring the toggle's initial position.
    pub initial_mode: Option<ProtocolMode>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            listen_port: GDL90_PORT,
            multicast_group: None,
            command_port: COMMAND_PORT,
            command_target: None,
            live_window: LIVE_WINDOW,
            poll_timeout: POLL_TIMEOUT,
            buffer_len: RECV_BUFFER_LEN,
            initial_mode: Some(ProtocolMode::Enable),
        }
    }
}

impl MonitorConfig {
    /// Listen on `listen_port` and send commands to `command_target`,
    /// with no startup command. Mostly useful on loopback.
    pub fn local(listen_port: u16, command_target: SocketAddrV4) -> Self {
        Self {
            listen_port,
            command_target: Some(command_target),
            initial_mode: None,
            ..Default::default()
        }
    }

    pub fn with_multicast_group(group: Ipv4Addr) -> Self {
        Self {
            multicast_group: Some(group),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.live_window.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "live_window must be non-zero".into(),
            ));
        }
        if self.poll_timeout.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "poll_timeout must be non-zero".into(),
            ));
        }
        if self.buffer_len < 2 {
            return Err(MonitorError::InvalidConfig(format!(
                "buffer_len must hold at least the frame flag and message id, got {}",
                self.buffer_len
            )));
        }
        if let Some(group) = self.multicast_group.filter(|g| !g.is_multicast()) {
            return Err(MonitorError::InvalidConfig(format!(
                "{group} is not a multicast address"
            )));
        }
        Ok(())
    }
}
