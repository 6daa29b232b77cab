use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of every Stratus control datagram.
pub const COMMAND_LEN: usize = 8;

/// Index of the byte that carries the requested mode.
pub const MODE_FLAG_INDEX: usize = 5;

// C2 53 FF 56 01 01 6E 37 -> open GDL-90 output
const ENABLE_GDL90: [u8; COMMAND_LEN] = [0xC2, 0x53, 0xFF, 0x56, 0x01, 0x01, 0x6E, 0x37];
// C2 53 FF 56 01 00 6D 36 -> back to ForeFlight-only output
const DISABLE_GDL90: [u8; COMMAND_LEN] = [0xC2, 0x53, 0xFF, 0x56, 0x01, 0x00, 0x6D, 0x36];

/// Output protocol requested from the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolMode {
    /// Open GDL-90 broadcast.
    Enable,
    /// Vendor-only (ForeFlight) broadcast.
    Disable,
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolMode::Enable => f.write_str("enable"),
            ProtocolMode::Disable => f.write_str("disable"),
        }
    }
}

/// A ready-to-send control datagram.
///
/// The checksum trailer is the device's own and is kept as an opaque
/// constant; never rebuild it from the other bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandPayload([u8; COMMAND_LEN]);

impl CommandPayload {
    pub const fn as_bytes(&self) -> &[u8; COMMAND_LEN] {
        &self.0
    }

    /// The mode byte, `1` for enable and `0` for disable.
    pub const fn mode_flag(&self) -> u8 {
        self.0[MODE_FLAG_INDEX]
    }
}

impl AsRef<[u8]> for CommandPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Returns the control datagram for `mode`.
pub const fn encode(mode: ProtocolMode) -> CommandPayload {
    match mode {
        ProtocolMode::Enable => CommandPayload(ENABLE_GDL90),
        ProtocolMode::Disable => CommandPayload(DISABLE_GDL90),
    }
}
