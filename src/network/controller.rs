use crate::error::{MonitorError, Result, StatusEvent, StatusSender};
use crate::protocol::{ProtocolMode, encode};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Pending {
    mode: Mutex<Option<ProtocolMode>>,
    wake: Notify,
    sent: AtomicU64,
}

/// Handle used to ask for a protocol change.
///
/// At most one request is pending: a newer request replaces an unsent one,
/// so one toggle never floods the network with repeated commands.
#[derive(Clone, Default)]
pub struct Controller {
    pending: Arc<Pending>,
}

impl Controller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_mode_change(&self, mode: ProtocolMode) {
        let replaced = self
            .pending
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(mode);
        if let Some(previous) = replaced {
            debug!(%previous, %mode, "coalesced pending mode change");
        }
        self.pending.wake.notify_one();
    }

    /// Mode waiting to be sent, if any.
    pub fn pending(&self) -> Option<ProtocolMode> {
        *self
            .pending
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Commands actually put on the wire.
    pub fn commands_sent(&self) -> u64 {
        self.pending.sent.load(Ordering::Relaxed)
    }

    fn take_pending(&self) -> Option<ProtocolMode> {
        self.pending
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Sends pending mode changes to the receiver. Fire-and-forget: the device
/// never acknowledges, so nothing is retried.
pub struct CommandDispatcher {
    socket: UdpSocket,
    target: SocketAddr,
    controller: Controller,
    status: StatusSender,
}

impl CommandDispatcher {
    pub async fn bind(
        target: SocketAddrV4,
        controller: Controller,
        status: StatusSender,
    ) -> Result<Self> {
        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| MonitorError::Bind {
                addr: local,
                source,
            })?;
        socket.set_broadcast(true)?;

        Ok(Self {
            socket,
            target: target.into(),
            controller,
            status,
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends the command for `mode` once.
    pub async fn send(&self, mode: ProtocolMode) -> Result<()> {
        let payload = encode(mode);
        self.socket
            .send_to(payload.as_bytes(), self.target)
            .await
            .map_err(|source| MonitorError::CommandSend {
                target: self.target,
                source,
            })?;
        self.controller.pending.sent.fetch_add(1, Ordering::Relaxed);
        info!("Sent {} command to {}", mode, self.target);
        Ok(())
    }

    /// Dispatch loop. Only returns once `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.controller.pending.wake.notified() => {}
            }

            // The lock is released before the send.
            let Some(mode) = self.controller.take_pending() else {
                continue;
            };
            if let Err(e) = self.send(mode).await {
                warn!("{}", e);
                let _ = self.status.send(StatusEvent::CommandSendFailed { mode });
            }
        }
        debug!("command dispatcher stopped");
    }
}
