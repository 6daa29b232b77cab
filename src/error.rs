//! Error and status types.

use crate::protocol::ProtocolMode;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the fallible setup steps and from sending a command.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to send command to {target}: {source}")]
    CommandSend {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

pub type StatusSender = mpsc::UnboundedSender<StatusEvent>;
pub type StatusReceiver = mpsc::UnboundedReceiver<StatusEvent>;

/// Non-fatal conditions reported to whoever displays the monitor.
///
/// `Display` gives the one-line status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// No usable IPv4 interface; commands go to loopback.
    LocalAddressUnavailable,
    /// The GDL-90 port could not be bound for shared listening.
    ReceivePortUnavailable { port: u16 },
    /// The multicast group could not be joined; unicast/broadcast only.
    MulticastUnavailable { group: Ipv4Addr },
    /// A control datagram could not be sent.
    CommandSendFailed { mode: ProtocolMode },
    /// Fault caught inside the receive loop.
    RuntimeError(String),
}

impl StatusEvent {
    /// True for the configuration conditions detected at startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            StatusEvent::LocalAddressUnavailable
                | StatusEvent::ReceivePortUnavailable { .. }
                | StatusEvent::MulticastUnavailable { .. }
        )
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusEvent::LocalAddressUnavailable => {
                f.write_str("IP address error: check that Wi-Fi is connected")
            }
            StatusEvent::ReceivePortUnavailable { port } => {
                write!(f, "Port {port} is not accessible")
            }
            StatusEvent::MulticastUnavailable { group } => {
                write!(f, "Cannot join multicast group {group}")
            }
            StatusEvent::CommandSendFailed { mode } => {
                write!(f, "Could not send {mode} command")
            }
            StatusEvent::RuntimeError(msg) => write!(f, "Runtime error: {msg}"),
        }
    }
}
