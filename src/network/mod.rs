pub mod controller;
pub mod receiver;
pub mod subnet;

pub use controller::{CommandDispatcher, Controller};
pub use receiver::{ReceiveCounters, ReceiveStats, Receiver};
pub use subnet::SubnetAddress;
