// Bridge module - Passthrough orchestration
pub mod bridge;
mod pump;
pub mod state;

pub use bridge::Bridge;
pub use state::{BridgeState, BridgeStatistics, StatisticsSnapshot};
