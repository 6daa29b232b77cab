pub mod classify;
pub mod command;

pub use classify::{Channel, FRAME_FLAG, classify, message_id};
pub use command::{COMMAND_LEN, CommandPayload, ProtocolMode, encode};

/// Port most ADS-B receivers broadcast GDL-90 on.
pub const GDL90_PORT: u16 = 4000;
/// Port the Stratus listens on for control datagrams.
pub const COMMAND_PORT: u16 = 41500;
