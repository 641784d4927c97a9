//! psmd rendezvous wire format.
//!
//! Every datagram starts with a fixed 44-byte header followed by a
//! kind-specific body. The header is a #[repr(C)] struct of byte-aligned
//! fields with zerocopy derives, so parsing is a bounds check and a copy.
//! Multi-byte integers are big-endian.
//!
//! Bodies:
//!   Announce: raw peer id bytes (1..=MAX_PEER_ID_LEN)
//!   Lookup: empty
//!   Ack: empty
//!   Peers: JSON array of `WirePeer`
//!   Reject: UTF-8 reason

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::peer::PeerId;
use crate::topic::TopicId;

/// Magic prefix on every datagram.
pub const MAGIC: [u8; 4] = *b"PSMD";

/// Current wire version. Datagrams with any other version are dropped.
pub const WIRE_VERSION: u8 = 0x01;

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM: usize = 1400;

/// Longest peer id accepted in an announce body.
pub const MAX_PEER_ID_LEN: usize = 64;

/// Cap on peers returned in one lookup reply. Freshest first.
pub const MAX_PEERS_PER_RESPONSE: usize = 16;

/// Default UDP port of the rendezvous server.
pub const DEFAULT_SERVER_PORT: u16 = 7420;

/// IPv4 multicast group for LAN presence beacons.
pub const LAN_MULTICAST_ADDR: &str = "239.255.70.77";

/// UDP port for LAN presence beacons.
pub const LAN_PORT: u16 = 7422;

// ── Header ────────────────────────────────────────────────────────────────────

/// Fixed datagram header.
///
/// Wire size: 44 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Header {
    /// Always `MAGIC`.
    pub magic: [u8; 4],

    /// Always `WIRE_VERSION`.
    pub version: u8,

    /// One of `Kind`.
    pub kind: u8,

    /// Chosen by the requester, echoed in the reply.
    pub request_id: U32<NetworkEndian>,

    /// Announce: port the peer accepts connections on. 0 = use the
    /// datagram's source port. Zero for every other kind.
    pub port: U16<NetworkEndian>,

    /// Topic the request is about.
    pub topic: [u8; 32],
}

assert_eq_size!(Header, [u8; 44]);

pub const HEADER_LEN: usize = 44;

/// Datagram kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Announce = 0x01,
    Lookup = 0x02,
    Ack = 0x03,
    Peers = 0x04,
    Reject = 0x05,
}

impl TryFrom<u8> for Kind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Kind::Announce),
            0x02 => Ok(Kind::Lookup),
            0x03 => Ok(Kind::Ack),
            0x04 => Ok(Kind::Peers),
            0x05 => Ok(Kind::Reject),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

impl From<Kind> for u8 {
    fn from(k: Kind) -> u8 {
        k as u8
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// One peer in a `Peers` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePeer {
    /// Hex-encoded peer id.
    pub peer_id: String,
    pub address: String,
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Announce {
        request_id: u32,
        topic: TopicId,
        port: u16,
        peer_id: PeerId,
    },
    Lookup {
        request_id: u32,
        topic: TopicId,
    },
    Ack {
        request_id: u32,
        topic: TopicId,
    },
    Peers {
        request_id: u32,
        topic: TopicId,
        peers: Vec<WirePeer>,
    },
    Reject {
        request_id: u32,
        topic: TopicId,
        reason: String,
    },
}

impl Message {
    pub fn request_id(&self) -> u32 {
        match self {
            Message::Announce { request_id, .. }
            | Message::Lookup { request_id, .. }
            | Message::Ack { request_id, .. }
            | Message::Peers { request_id, .. }
            | Message::Reject { request_id, .. } => *request_id,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Message::Announce { .. } => Kind::Announce,
            Message::Lookup { .. } => Kind::Lookup,
            Message::Ack { .. } => Kind::Ack,
            Message::Peers { .. } => Kind::Peers,
            Message::Reject { .. } => Kind::Reject,
        }
    }

    /// Build a `Peers` reply from candidates in preference order, keeping
    /// as many as fit in one datagram (at most `MAX_PEERS_PER_RESPONSE`).
    pub fn peers_reply(request_id: u32, topic: TopicId, candidates: Vec<WirePeer>) -> Self {
        // "[]" plus a comma between entries.
        let mut body_len = 2;
        let mut peers = Vec::new();
        for peer in candidates.into_iter().take(MAX_PEERS_PER_RESPONSE) {
            let entry_len = match serde_json::to_vec(&peer) {
                Ok(v) => v.len(),
                Err(_) => continue,
            };
            let sep = usize::from(!peers.is_empty());
            if HEADER_LEN + body_len + sep + entry_len > MAX_DATAGRAM {
                break;
            }
            body_len += sep + entry_len;
            peers.push(peer);
        }
        Message::Peers {
            request_id,
            topic,
            peers,
        }
    }

    /// Serialize to a datagram.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let (topic, port, body) = match self {
            Message::Announce {
                topic,
                port,
                peer_id,
                ..
            } => {
                check_peer_id(peer_id.as_bytes())?;
                (topic, *port, peer_id.as_bytes().to_vec())
            }
            Message::Lookup { topic, .. } | Message::Ack { topic, .. } => (topic, 0, Vec::new()),
            Message::Peers { topic, peers, .. } => (
                topic,
                0,
                serde_json::to_vec(peers).map_err(|e| WireError::BadBody(e.to_string()))?,
            ),
            Message::Reject { topic, reason, .. } => (topic, 0, reason.as_bytes().to_vec()),
        };

        let header = Header {
            magic: MAGIC,
            version: WIRE_VERSION,
            kind: self.kind().into(),
            request_id: U32::new(self.request_id()),
            port: U16::new(port),
            topic: topic.0,
        };

        let total = HEADER_LEN + body.len();
        if total > MAX_DATAGRAM {
            return Err(WireError::TooLarge(total));
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse a datagram. Anything malformed is an error; callers drop it.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(WireError::TooLarge(bytes.len()));
        }
        let header = Header::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))?;
        if header.magic != MAGIC {
            return Err(WireError::BadMagic);
        }
        if header.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        let kind = Kind::try_from(header.kind)?;
        let request_id = header.request_id.get();
        let topic = TopicId(header.topic);
        let body = &bytes[HEADER_LEN..];

        let msg = match kind {
            Kind::Announce => {
                check_peer_id(body)?;
                Message::Announce {
                    request_id,
                    topic,
                    port: header.port.get(),
                    peer_id: PeerId::new(body.to_vec()).map_err(|_| WireError::EmptyPeerId)?,
                }
            }
            Kind::Lookup => Message::Lookup { request_id, topic },
            Kind::Ack => Message::Ack { request_id, topic },
            Kind::Peers => Message::Peers {
                request_id,
                topic,
                peers: serde_json::from_slice(body)
                    .map_err(|e| WireError::BadBody(e.to_string()))?,
            },
            Kind::Reject => Message::Reject {
                request_id,
                topic,
                reason: String::from_utf8_lossy(body).into_owned(),
            },
        };
        Ok(msg)
    }
}

fn check_peer_id(bytes: &[u8]) -> Result<(), WireError> {
    if bytes.is_empty() {
        return Err(WireError::EmptyPeerId);
    }
    if bytes.len() > MAX_PEER_ID_LEN {
        return Err(WireError::PeerIdTooLong(bytes.len()));
    }
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram of {0} bytes is shorter than the header")]
    Truncated(usize),

    #[error("bad magic")]
    BadMagic,

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("unknown datagram kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("datagram of {0} bytes exceeds maximum {}", MAX_DATAGRAM)]
    TooLarge(usize),

    #[error("announce carries an empty peer id")]
    EmptyPeerId,

    #[error("peer id of {0} bytes exceeds maximum {}", MAX_PEER_ID_LEN)]
    PeerIdTooLong(usize),

    #[error("malformed body: {0}")]
    BadBody(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicId {
        TopicId([0x42; 32])
    }

    #[test]
    fn header_layout_is_big_endian() {
        let msg = Message::Announce {
            request_id: 0x0102_0304,
            topic: topic(),
            port: 1883,
            peer_id: PeerId::from("nodeB"),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(&bytes[..4], b"PSMD");
        assert_eq!(bytes[4], WIRE_VERSION);
        assert_eq!(bytes[5], Kind::Announce as u8);
        assert_eq!(&bytes[6..10], &[1, 2, 3, 4]);
        assert_eq!(&bytes[10..12], &1883u16.to_be_bytes());
        assert_eq!(&bytes[12..44], &[0x42; 32]);
        assert_eq!(&bytes[44..], b"nodeB");
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn peers_reply_carries_json_body() {
        let msg = Message::Peers {
            request_id: 9,
            topic: topic(),
            peers: vec![WirePeer {
                peer_id: hex::encode("nodeB"),
                address: "10.0.0.2:1883".into(),
            }],
        };
        let bytes = msg.encode().unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes[HEADER_LEN..]).unwrap();
        assert_eq!(body[0]["address"], "10.0.0.2:1883");
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decode_rejects_truncated() {
        assert_eq!(Message::decode(&[0u8; 10]), Err(WireError::Truncated(10)));
    }

    #[test]
    fn decode_rejects_bad_magic_and_version() {
        let mut bytes = Message::Lookup {
            request_id: 1,
            topic: topic(),
        }
        .encode()
        .unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(Message::decode(&bad_magic), Err(WireError::BadMagic));

        bytes[4] = 0x7f;
        assert_eq!(Message::decode(&bytes), Err(WireError::UnknownVersion(0x7f)));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut bytes = Message::Ack {
            request_id: 1,
            topic: topic(),
        }
        .encode()
        .unwrap();
        bytes[5] = 0xee;
        assert_eq!(Message::decode(&bytes), Err(WireError::UnknownKind(0xee)));
    }

    #[test]
    fn announce_requires_peer_id() {
        let mut bytes = Message::Announce {
            request_id: 1,
            topic: topic(),
            port: 0,
            peer_id: PeerId::from("a"),
        }
        .encode()
        .unwrap();
        bytes.truncate(HEADER_LEN);
        assert_eq!(Message::decode(&bytes), Err(WireError::EmptyPeerId));

        let long = Message::Announce {
            request_id: 1,
            topic: topic(),
            port: 0,
            peer_id: PeerId::new(vec![7u8; MAX_PEER_ID_LEN + 1]).unwrap(),
        };
        assert_eq!(
            long.encode(),
            Err(WireError::PeerIdTooLong(MAX_PEER_ID_LEN + 1))
        );
    }

    #[test]
    fn peers_reply_is_trimmed_to_fit() {
        let candidates: Vec<WirePeer> = (0..MAX_PEERS_PER_RESPONSE + 4)
            .map(|i| WirePeer {
                peer_id: hex::encode([i as u8; MAX_PEER_ID_LEN]),
                address: format!("[2001:db8::{i}]:65535"),
            })
            .collect();
        let msg = Message::peers_reply(1, topic(), candidates.clone());
        let bytes = msg.encode().unwrap();
        assert!(bytes.len() <= MAX_DATAGRAM);

        let Message::Peers { peers, .. } = msg else {
            panic!("expected a peers reply");
        };
        assert!(!peers.is_empty());
        assert!(peers.len() < MAX_PEERS_PER_RESPONSE);
        // Freshest-first order of the input is kept.
        assert_eq!(peers[0], candidates[0]);
    }

    #[test]
    fn small_peers_reply_is_capped_by_count() {
        let candidates: Vec<WirePeer> = (0..MAX_PEERS_PER_RESPONSE * 2)
            .map(|i| WirePeer {
                peer_id: format!("{i:02x}"),
                address: "10.0.0.1:1".into(),
            })
            .collect();
        let Message::Peers { peers, .. } = Message::peers_reply(1, topic(), candidates) else {
            panic!("expected a peers reply");
        };
        assert_eq!(peers.len(), MAX_PEERS_PER_RESPONSE);
    }

    #[test]
    fn kind_round_trip() {
        for k in [Kind::Announce, Kind::Lookup, Kind::Ack, Kind::Peers, Kind::Reject] {
            assert_eq!(Kind::try_from(u8::from(k)).unwrap(), k);
        }
        assert!(Kind::try_from(0x00).is_err());
    }
}
