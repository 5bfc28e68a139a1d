// Core module - Bridge lifecycle and cancellation
pub mod bridge;
pub mod cancellation;
