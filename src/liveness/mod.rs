pub mod tracker;

pub use tracker::{ChannelState, LivenessTracker, TrackerState};
