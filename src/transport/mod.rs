#[cfg(test)]
pub mod loopback;
pub mod rfcomm;
pub mod traits;

pub use rfcomm::{BluerAdapter, RfcommConfig, RfcommConnector, RfcommTransportStream};
pub use traits::{RadioAdapter, TransportConnector, TransportStream};
