//! Transport trait: the discovery network a rendezvous session runs on.
//!
//! A transport only has to announce "I am here" under a topic and list who
//! else is there. Framing, routing and bootstrap belong to the concrete
//! network; the rendezvous client never looks inside.

pub mod lan;
pub mod memory;
pub mod udp;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use psmd_core::{PeerAddress, TopicId};

/// Transport operation, for logs, errors and degraded events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Bootstrap,
    Announce,
    Lookup,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Bootstrap => "bootstrap",
            Operation::Announce => "announce",
            Operation::Lookup => "lookup",
        })
    }
}

/// Any failure reported by a transport. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: Operation, after: Duration },

    #[error("i/o error: {0}")]
    Io(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("rejected by remote: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// A pluggable discovery network.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short name for logs and the status API.
    fn name(&self) -> &'static str;

    /// Resolve once the network can serve announce and lookup. Networks
    /// without a ready signal keep the default.
    async fn bootstrap(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Publish the local node under `topic`.
    async fn announce(&self, topic: &TopicId) -> Result<(), TransportError>;

    /// List peers currently known under `topic`.
    async fn lookup(&self, topic: &TopicId) -> Result<Vec<PeerAddress>, TransportError>;
}

/// Bound a transport call. Elapsed calls become `TransportError::Timeout`.
pub async fn with_timeout<R>(
    operation: Operation,
    after: Duration,
    call: impl Future<Output = Result<R, TransportError>>,
) -> Result<R, TransportError> {
    tokio::time::timeout(after, call)
        .await
        .map_err(|_| TransportError::Timeout { operation, after })?
}
