// Domain module - Frames, configuration and errors
pub mod config;
pub mod error;
pub mod frame;
