use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result, StatusEvent, StatusSender};
use crate::liveness::LivenessTracker;
use crate::protocol::{Channel, classify};
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::any::Any;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

// Largest UDP payload. Receiving into anything smaller makes Windows fail
// the read instead of truncating it.
const MAX_DATAGRAM: usize = 65_535;

/// Receive-loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiveStats {
    pub datagrams: u64,
    pub classified: u64,
    pub unclassified: u64,
    pub timeouts: u64,
    pub read_errors: u64,
    pub faults: u64,
}

#[derive(Debug, Default)]
pub struct ReceiveCounters {
    datagrams: AtomicU64,
    classified: AtomicU64,
    unclassified: AtomicU64,
    timeouts: AtomicU64,
    read_errors: AtomicU64,
    faults: AtomicU64,
}

impl ReceiveCounters {
    pub fn stats(&self) -> ReceiveStats {
        ReceiveStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            unclassified: self.unclassified.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Listens for GDL-90 datagrams and feeds the liveness tracker.
pub struct Receiver {
    socket: UdpSocket,
    tracker: LivenessTracker,
    status: StatusSender,
    counters: Arc<ReceiveCounters>,
    poll_timeout: Duration,
    buffer_len: usize,
}

impl Receiver {
    /// Binds the GDL-90 port. Must be called from within a tokio runtime.
    ///
    /// If the port cannot be bound for shared listening, an ephemeral
    /// socket is used instead and [`StatusEvent::ReceivePortUnavailable`]
    /// is reported; if the multicast group cannot be joined,
    /// [`StatusEvent::MulticastUnavailable`] is reported and the socket
    /// keeps receiving unicast and broadcast traffic.
    pub fn bind(
        config: &MonitorConfig,
        tracker: LivenessTracker,
        status: StatusSender,
    ) -> Result<Self> {
        let socket = open_socket(config, &status)?;
        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket)?;

        Ok(Self {
            socket,
            tracker,
            status,
            counters: Arc::new(ReceiveCounters::default()),
            poll_timeout: config.poll_timeout,
            buffer_len: config.buffer_len,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn counters(&self) -> Arc<ReceiveCounters> {
        Arc::clone(&self.counters)
    }

    /// Classifies one datagram and records it. Unclassified datagrams are
    /// dropped.
    pub fn dispatch(&self, payload: &[u8]) -> Option<Channel> {
        ReceiveCounters::bump(&self.counters.datagrams);
        let channel = classify(payload);
        match channel {
            Some(channel) => {
                ReceiveCounters::bump(&self.counters.classified);
                self.tracker.record_received(channel);
                debug!(%channel, len = payload.len(), "datagram");
            }
            None => {
                ReceiveCounters::bump(&self.counters.unclassified);
                trace!(len = payload.len(), "unclassified datagram dropped");
            }
        }
        channel
    }

    /// Receive loop. Only returns once `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        self.run_with(cancel, |receiver, payload| {
            receiver.dispatch(payload);
        })
        .await
    }

    /// Receive loop with the per-datagram step supplied by the caller.
    ///
    /// Each datagram is cut to `buffer_len` bytes before `step` sees it. A
    /// panic in `step` is reported as [`StatusEvent::RuntimeError`] and the
    /// loop carries on.
    pub(crate) async fn run_with<F>(self, cancel: CancellationToken, step: F)
    where
        F: Fn(&Receiver, &[u8]),
    {
        match self.socket.local_addr() {
            Ok(addr) => info!("Listening for GDL-90 on {}", addr),
            Err(e) => warn!("Listening for GDL-90 on unknown address: {}", e),
        }

        let mut buf = vec![0u8; MAX_DATAGRAM.max(self.buffer_len)];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = timeout(self.poll_timeout, self.socket.recv_from(&mut buf)) => r,
            };

            match received {
                Err(_elapsed) => {
                    ReceiveCounters::bump(&self.counters.timeouts);
                    trace!("receive timed out");
                }
                Ok(Err(e)) => {
                    ReceiveCounters::bump(&self.counters.read_errors);
                    warn!("GDL-90 receive error: {}", e);
                }
                Ok(Ok((len, _src))) => {
                    let payload = &buf[..len.min(self.buffer_len)];
                    if let Err(cause) =
                        panic::catch_unwind(AssertUnwindSafe(|| step(&self, payload)))
                    {
                        self.report_fault(cause);
                    }
                }
            }
        }
        debug!("receiver stopped");
    }

    fn report_fault(&self, cause: Box<dyn Any + Send>) {
        ReceiveCounters::bump(&self.counters.faults);
        let message = panic_message(cause.as_ref());
        error!("Fault in receive loop: {}", message);
        let _ = self.status.send(StatusEvent::RuntimeError(message));
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown fault".to_string()
    }
}

fn open_socket(config: &MonitorConfig, status: &StatusSender) -> Result<std::net::UdpSocket> {
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.listen_port);

    match bind_shared(addr) {
        Ok(socket) => {
            if let Some(group) = config.multicast_group {
                match socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED) {
                    Ok(()) => info!("Joined multicast group {}", group),
                    Err(e) => {
                        warn!("Cannot join multicast group {}: {}", group, e);
                        let _ = status.send(StatusEvent::MulticastUnavailable { group });
                    }
                }
            }
            Ok(socket.into())
        }
        Err(e) => {
            warn!("Port {} unavailable: {}", config.listen_port, e);
            let _ = status.send(StatusEvent::ReceivePortUnavailable {
                port: config.listen_port,
            });
            let fallback = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
            std::net::UdpSocket::bind(fallback).map_err(|source| MonitorError::Bind {
                addr: fallback.into(),
                source,
            })
        }
    }
}

// Several apps (EFBs, loggers) usually listen on the GDL-90 port at once.
fn bind_shared(addr: SocketAddrV4) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}
