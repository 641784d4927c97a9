//! psmd-services: peer directory, transports, and the rendezvous client
//! and server built on them.

pub mod peer;
pub mod rendezvous;
pub mod server;
pub mod transport;

pub use peer::{expiry_loop, PeerDirectory, PeerRecord, Upsert};
pub use rendezvous::{
    DegradedConnectivity, DiscoveryEvent, JoinError, RendezvousClient, RendezvousSession,
    SessionMonitor, SessionState,
};
pub use server::RendezvousServer;
pub use transport::lan::LanTransport;
pub use transport::memory::{MemoryNetwork, MemoryTransport};
pub use transport::udp::UdpTransport;
pub use transport::{Operation, Transport, TransportError};
