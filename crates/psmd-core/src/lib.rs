//! psmd-core: topic derivation, peer identity, wire format and configuration.
//! All other psmd crates depend on this one.

pub mod config;
pub mod error;
pub mod peer;
pub mod topic;
pub mod wire;

pub use error::InvalidInput;
pub use peer::{PeerAddress, PeerId};
pub use topic::{Topic, TopicId};
