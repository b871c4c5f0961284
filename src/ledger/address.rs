//! Addresses and deterministic record derivation
//!
//! Every record lives at `derive(label, keys...)`. The derivation is pure and
//! only used for keying: holding an address never implies owning the record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Fixed labels records are derived from
pub mod seeds {
    pub const GLOBAL_STATE_SEED: &[u8] = b"GLOBAL-STATE-SEED";
    pub const VAULT_SEED: &[u8] = b"VAULT-SEED";
    pub const USER_INFO_SEED: &[u8] = b"USER-INFO-SEED";
    pub const RANDOM_SEED: &[u8] = b"RANDOM-SEED";
    pub const IDENTITY_SEED: &[u8] = b"IDENTITY-SEED";
}

/// 32-byte identity or record key
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Identity derived from a human readable name (CLI and test users)
    pub fn from_name(name: &str) -> Self {
        derive(seeds::IDENTITY_SEED, &[name.as_bytes()])
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}..)", &self.to_hex()[..12])
    }
}

/// Derive an address from a label and any number of keys.
///
/// Each key is length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
pub fn derive(label: &[u8], keys: &[&[u8]]) -> Address {
    let mut hasher = Sha256::new();
    hasher.update((label.len() as u32).to_le_bytes());
    hasher.update(label);
    for key in keys {
        hasher.update((key.len() as u32).to_le_bytes());
        hasher.update(key);
    }
    Address(hasher.finalize().into())
}

/// Identifier binding one bet to one randomness request
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub [u8; 32]);

impl RequestId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Client-side derivation: label + time-based nonce + bettor identity.
    ///
    /// A bettor gets one fresh id per nonce value (unix seconds in practice).
    pub fn derive(nonce: u32, user: &Address) -> Self {
        let address = derive(seeds::RANDOM_SEED, &[&nonce.to_le_bytes(), user.as_bytes()]);
        Self(address.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Address::from_hex(s).map(|a| Self(a.0))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({}..)", &self.to_hex()[..12])
    }
}
