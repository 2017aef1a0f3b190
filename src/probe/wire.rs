//! Wire messages.
//!
//! Small JSON mappings, around 60 bytes before transport framing. Decoding
//! is tolerant: anything that is not a well-formed ping or pong is ignored
//! rather than treated as an error, since the destination may receive
//! unrelated traffic.

use serde::{Deserialize, Serialize};

use crate::transport::Identity;

/// Client to base station: `{"ping": n, "from": "<hex>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub ping: u64,
    pub from: Identity,
}

/// Base station to client: `{"pong": n}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub pong: u64,
}

impl Ping {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

impl Pong {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_wire_shape() {
        let ping = Ping {
            ping: 42,
            from: Identity::from_hex("ca60113e441aa89fe4e6443339c7becb").unwrap(),
        };
        let bytes = ping.encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["ping"], 42);
        assert_eq!(json["from"], "ca60113e441aa89fe4e6443339c7becb");
        // Stays comfortably under typical radio frame budgets.
        assert!(bytes.len() < 80);

        assert_eq!(Ping::decode(&bytes), Some(ping));
    }

    #[test]
    fn test_pong_roundtrip() {
        let pong = Pong { pong: 7 };
        let bytes = pong.encode().unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&bytes).unwrap()["pong"], 7);
        assert_eq!(Pong::decode(&bytes), Some(pong));
    }

    #[test]
    fn test_decode_tolerates_garbage() {
        assert!(Pong::decode(b"not json").is_none());
        assert!(Pong::decode(b"{\"ping\": 1}").is_none());
        assert!(Ping::decode(b"{\"ping\": 1}").is_none()); // missing "from"
        assert!(Ping::decode(b"").is_none());
    }
}
