use serde::{Deserialize, Serialize};
use std::fmt;

/// GDL-90 frame flag, always the first byte of a frame.
pub const FRAME_FLAG: u8 = 0x7E;

/// GDL-90 message identifiers (second byte of a frame).
pub mod message_id {
    pub const HEARTBEAT: u8 = 0;
    pub const UPLINK: u8 = 7;
    /// Ownship report, i.e. the GPS position.
    pub const OWNSHIP: u8 = 10;
    pub const TRAFFIC: u8 = 20;
    /// Not part of GDL-90 proper. Stratux sends `0x4C` alone, ForeFlight
    /// follows it with a sub-id of `1`.
    pub const AHRS: u8 = 0x4C;
}

/// Signal category a datagram belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Heartbeat,
    Gps,
    Traffic,
    Ahrs,
    Uplink,
}

impl Channel {
    pub const COUNT: usize = 5;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::Heartbeat,
        Channel::Gps,
        Channel::Traffic,
        Channel::Ahrs,
        Channel::Uplink,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Heartbeat => "heartbeat",
            Channel::Gps => "gps",
            Channel::Traffic => "traffic",
            Channel::Ahrs => "ahrs",
            Channel::Uplink => "uplink",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a raw datagram to its channel.
///
/// Only the frame flag and the message id are looked at; anything shorter
/// than two bytes or not starting with [`FRAME_FLAG`] is unclassified.
pub fn classify(payload: &[u8]) -> Option<Channel> {
    let [FRAME_FLAG, id, ..] = payload else {
        return None;
    };

    match *id {
        message_id::HEARTBEAT => Some(Channel::Heartbeat),
        message_id::OWNSHIP => Some(Channel::Gps),
        message_id::TRAFFIC => Some(Channel::Traffic),
        message_id::UPLINK => Some(Channel::Uplink),
        // The ForeFlight form (sub-id 1) is an alias of the Stratux form.
        message_id::AHRS => Some(Channel::Ahrs),
        _ => None,
    }
}
