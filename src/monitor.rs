//! Wiring of the receive loop, the command dispatcher and the tracker.

use crate::config::MonitorConfig;
use crate::error::{Result, StatusEvent, StatusReceiver};
use crate::liveness::{LivenessTracker, TrackerState};
use crate::network::{
    CommandDispatcher, Controller, ReceiveCounters, ReceiveStats, Receiver, SubnetAddress,
};
use crate::protocol::ProtocolMode;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running monitor: both loops are spawned on the current runtime.
pub struct Monitor {
    tracker: LivenessTracker,
    controller: Controller,
    counters: Arc<ReceiveCounters>,
    listen_addr: SocketAddr,
    command_target: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Binds both sockets and spawns the receive and dispatch loops.
    ///
    /// Configuration problems that have a fallback are reported on the
    /// returned status channel rather than failing startup.
    pub async fn start(config: MonitorConfig) -> Result<(Self, StatusReceiver)> {
        config.validate()?;
        let (status, status_rx) = mpsc::unbounded_channel();

        let command_target = match config.command_target {
            Some(target) => target,
            None => {
                let (subnet, fell_back) = SubnetAddress::detect_or_loopback();
                if fell_back {
                    warn!("No usable local address, sending commands to loopback");
                    let _ = status.send(StatusEvent::LocalAddressUnavailable);
                }
                info!(
                    "Local address {}, commands to broadcast {}",
                    subnet.local(),
                    subnet.broadcast()
                );
                SocketAddrV4::new(subnet.broadcast(), config.command_port)
            }
        };

        let tracker = LivenessTracker::new(config.live_window);
        let controller = Controller::new();

        let receiver = Receiver::bind(&config, tracker.clone(), status.clone())?;
        let listen_addr = receiver.local_addr()?;
        let counters = receiver.counters();
        let dispatcher =
            CommandDispatcher::bind(command_target, controller.clone(), status).await?;

        if let Some(mode) = config.initial_mode {
            controller.request_mode_change(mode);
        }

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(receiver.run(cancel.child_token())),
            tokio::spawn(dispatcher.run(cancel.child_token())),
        ];

        Ok((
            Self {
                tracker,
                controller,
                counters,
                listen_addr,
                command_target: command_target.into(),
                cancel,
                tasks,
            },
            status_rx,
        ))
    }

    pub fn snapshot(&self) -> TrackerState {
        self.tracker.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.tracker.subscribe()
    }

    pub fn request_mode_change(&self, mode: ProtocolMode) {
        self.controller.request_mode_change(mode);
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn receive_stats(&self) -> ReceiveStats {
        self.counters.stats()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn command_target(&self) -> SocketAddr {
        self.command_target
    }

    /// Token that stops both loops when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops both loops, cancels pending decay timers and waits for the
    /// loops to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.tracker.shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Monitor task ended abnormally: {}", e);
            }
        }
        info!("Monitor stopped");
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.tracker.shutdown();
    }
}
