// Infrastructure module - Device, network and host adapters
pub mod config;
pub mod logging;
pub mod serial;
pub mod tcp;
