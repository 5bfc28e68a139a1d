// Serial module - Serial device link
pub mod device;
pub mod fake;
pub mod link;

pub use device::{PortOpener, SerialDevice, SerialOpener};
pub use link::{SerialEndpointState, SerialLink};
