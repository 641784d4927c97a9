//! Input validation errors shared across crates.

/// Malformed caller input. Always rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInput {
    #[error("topic seed must not be empty")]
    EmptySeed,

    #[error("peer id must not be empty")]
    EmptyPeerId,

    #[error("peer address must not be empty")]
    EmptyAddress,

    #[error("invalid hex: {0}")]
    BadHex(String),

    #[error("topic id must be 32 bytes, got {0}")]
    BadTopicLength(usize),
}
