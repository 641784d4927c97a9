//! Peer identity types returned by transports.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidInput;

/// Opaque peer identifier: a public key, a node id, or "host:port" bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Wrap raw bytes. Empty ids are rejected.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, InvalidInput> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(InvalidInput::EmptyPeerId);
        }
        Ok(Self(bytes))
    }

    /// A fresh random 32-byte id for a node with no configured identity.
    pub fn random() -> Self {
        Self(rand::random::<[u8; 32]>().to_vec())
    }

    pub fn from_hex(s: &str) -> Result<Self, InvalidInput> {
        let bytes = hex::decode(s).map_err(|e| InvalidInput::BadHex(e.to_string()))?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PeerId {
    /// Text ids such as "nodeB". An empty string yields an empty id, which
    /// the directory rejects on upsert.
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => write!(f, "PeerId({s})"),
            _ => write!(f, "PeerId({})", hex::encode(&self.0[..self.0.len().min(8)])),
        }
    }
}

/// One lookup result: who, and where to reach them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub peer_id: PeerId,
    pub address: String,
}

impl PeerAddress {
    pub fn new(peer_id: impl Into<PeerId>, address: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            address: address.into(),
        }
    }
}
