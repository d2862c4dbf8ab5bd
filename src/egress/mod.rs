pub mod connector;
pub mod socket;

pub use connector::{EgressConnector, EgressStream, TcpConnector};
pub use socket::{EgressEvent, EgressSocket};
