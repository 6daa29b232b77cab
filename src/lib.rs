//! # gdl90-monitor
//!
//! Watches the local network for GDL-90 datagrams broadcast by an ADS-B
//! receiver and reports, per signal type, whether that signal is live.
//!
//! - [`protocol`]: message classification and the Stratus control commands
//! - [`liveness`]: per-channel live/stale state with a 2 s decay
//! - [`network`]: the receive loop, the command dispatcher, subnet discovery
//! - [`Monitor`]: runs all of the above on a tokio runtime
//!
//! ```no_run
//! use gdl90_monitor::{Channel, Monitor, MonitorConfig, ProtocolMode};
//!
//! # async fn demo() -> gdl90_monitor::Result<()> {
//! let (monitor, mut status) = Monitor::start(MonitorConfig::default()).await?;
//! monitor.request_mode_change(ProtocolMode::Enable);
//!
//! let state = monitor.snapshot();
//! println!("traffic live: {}", state[Channel::Traffic].is_live);
//!
//! if let Ok(event) = status.try_recv() {
//!     println!("{}", event);
//! }
//! monitor.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod liveness;
pub mod monitor;
pub mod network;
pub mod protocol;

pub use config::MonitorConfig;
pub use error::{MonitorError, Result, StatusEvent, StatusReceiver};
pub use liveness::{ChannelState, LivenessTracker, TrackerState};
pub use monitor::Monitor;
pub use network::{Controller, ReceiveStats, SubnetAddress};
pub use protocol::{Channel, CommandPayload, ProtocolMode, classify, encode};
