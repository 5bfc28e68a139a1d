// TCP module - Network client link
pub mod link;

pub use link::{ClientInfo, NetworkEndpointState, NetworkLink};
