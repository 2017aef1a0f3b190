//! Node identities.
//!
//! An identity is the fixed-length destination handle used to address a node
//! in the mesh. Each node creates one on first run and persists it, so the
//! same hardware keeps the same address across test sessions.

use anyhow::{bail, Context, Result};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::Path;

/// Length of a destination handle in bytes.
pub const IDENTITY_LEN: usize = 16;

/// Opaque fixed-length destination handle, rendered as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// Create a fresh random identity.
    pub fn generate() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Parse a 32-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != IDENTITY_LEN * 2 {
            bail!(
                "identity must be {} hex characters, got {}",
                IDENTITY_LEN * 2,
                s.len()
            );
        }
        // Byte-indexed slicing below would panic mid-character on
        // multi-byte input, and this parses operator-typed strings.
        if !s.is_ascii() {
            bail!("invalid characters in identity: {:?}", s);
        }
        let mut bytes = [0u8; IDENTITY_LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(pair, 16)
                .with_context(|| format!("invalid hex in identity: {:?}", pair))?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Load a persisted identity from `path`, creating and saving a fresh
    /// one on first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read identity file {}", path.display()))?;
            Self::from_hex(&text)
                .with_context(|| format!("corrupt identity file {}", path.display()))
        } else {
            let identity = Self::generate();
            fs::write(path, identity.to_hex())
                .with_context(|| format!("failed to save identity to {}", path.display()))?;
            Ok(identity)
        }
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identity::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = Identity::generate();
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(Identity::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(Identity::from_hex("abcd").is_err());
        assert!(Identity::from_hex("zz60113e441aa89fe4e6443339c7becb").is_err());
    }

    #[test]
    fn test_from_hex_rejects_multibyte_utf8_without_panicking() {
        // 32 bytes long, so it passes the length check, but the two-byte
        // character would land an index mid-character.
        let input = format!("{}é{}", "a".repeat(15), "b".repeat(15));
        assert_eq!(input.len(), 32);
        assert!(Identity::from_hex(&input).is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = Identity::from_hex("ca60113e441aa89fe4e6443339c7becb").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"ca60113e441aa89fe4e6443339c7becb\"");
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_load_or_create_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt_id");
        let first = Identity::load_or_create(&path).unwrap();
        let second = Identity::load_or_create(&path).unwrap();
        assert_eq!(first, second);
    }
}
