//! The remote command channel (spec §4.2) and its process-lifetime registry
//! (spec §3 Connection).

pub mod connection;
pub mod protocol;
pub mod registry;

pub use connection::{ConnState, Connection};
pub use registry::{ConnectionKey, ConnectionRegistry};
