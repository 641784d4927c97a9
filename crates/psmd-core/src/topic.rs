//! Topic derivation: the shared rendezvous point.
//!
//! A topic id is SHA-256 over the UTF-8 bytes of a human-readable seed
//! (room name, shared passphrase). Any two peers holding the same seed
//! arrive at the same 32 bytes without talking to each other first, on
//! any platform and across restarts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::InvalidInput;

/// Fixed-length rendezvous identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicId(pub [u8; 32]);

impl TopicId {
    /// The all-zero id. Never produced by `derive` in practice; used as a
    /// target for reachability checks.
    pub const ZERO: TopicId = TopicId([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({})", self.short())
    }
}

impl FromStr for TopicId {
    type Err = InvalidInput;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| InvalidInput::BadHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| InvalidInput::BadTopicLength(bytes.len()))?;
        Ok(TopicId(arr))
    }
}

impl From<[u8; 32]> for TopicId {
    fn from(bytes: [u8; 32]) -> Self {
        TopicId(bytes)
    }
}

/// A seed string together with its derived id. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    raw: String,
    id: TopicId,
}

impl Topic {
    /// Derive a topic from a seed. Fails only on an empty seed.
    pub fn derive(raw: &str) -> Result<Self, InvalidInput> {
        if raw.is_empty() {
            return Err(InvalidInput::EmptySeed);
        }
        Ok(Self {
            raw: raw.to_owned(),
            id: topic_id(raw.as_bytes()),
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn id(&self) -> TopicId {
        self.id
    }
}

/// Free-function form of [`Topic::derive`].
pub fn derive(raw: &str) -> Result<Topic, InvalidInput> {
    Topic::derive(raw)
}

fn topic_id(seed: &[u8]) -> TopicId {
    TopicId(Sha256::digest(seed).into())
}
