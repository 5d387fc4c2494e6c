pub mod address;
pub mod bus;
pub mod envelope;
pub mod frame;
pub mod routing;
pub mod transport;
pub mod transports;

pub use address::Address;
pub use bus::{BusHandler, MessageBus};
pub use envelope::Envelope;
pub use routing::RoutingTable;
