//! SerialBridge Library
//!
//! Passthrough bridge between a line-oriented serial device and a single
//! TCP client, forwarding newline-terminated frames in both directions.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::domain::error::{BridgeError, BridgeResult};
pub use crate::domain::config::BridgeConfig;
pub use crate::domain::frame::{normalize, Frame};
pub use crate::core::bridge::{Bridge, BridgeState, StatisticsSnapshot};
pub use crate::core::cancellation::CancellationToken;
pub use crate::infrastructure::serial::{SerialEndpointState, SerialLink};
pub use crate::infrastructure::tcp::{NetworkEndpointState, NetworkLink};
