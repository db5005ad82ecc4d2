//! Writer identities and version addresses.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity of a writer log.
#[derive(
    Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    derive_more::From, derive_more::Into,
)]
pub struct WriterKey([u8; 32]);

impl WriterKey {
    /// Create a key from its raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to a hex string limited to the first 5 bytes for a friendly string
    /// representation of the key.
    pub fn fmt_short(&self) -> String {
        hex::encode(&self.0[..5])
    }
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WriterKey({})", self.fmt_short())
    }
}

impl FromStr for WriterKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|err| Error::Decode(format!("writer key: {err}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Decode("writer key: invalid length".to_string()))?;
        Ok(Self(bytes))
    }
}

/// Globally unique address of a version: the writer log and the position in it.
///
/// The canonical string form is `<hex writer key>:<seq>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address {
    /// The writer log.
    pub key: WriterKey,
    /// Position in the writer log, starting at 0.
    pub seq: u64,
}

impl Address {
    /// Create a new address.
    pub fn new(key: WriterKey, seq: u64) -> Self {
        Self { key, seq }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.seq)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}:{})", self.key.fmt_short(), self.seq)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((key, seq)) = s.split_once(':') else {
            return Err(Error::Decode(format!("invalid address: {s}")));
        };
        let key = key.parse()?;
        let seq = seq
            .parse()
            .map_err(|_| Error::Decode(format!("invalid address seq: {s}")))?;
        Ok(Self { key, seq })
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_string_form() {
        let key = WriterKey::from_bytes([7u8; 32]);
        let address = Address::new(key, 42);
        let s = address.to_string();
        assert_eq!(s, format!("{}:42", "07".repeat(32)));
        assert_eq!(s.parse::<Address>().unwrap(), address);
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{s}\""));
    }

    #[test]
    fn address_parse_errors() {
        assert!("nocolon".parse::<Address>().is_err());
        assert!("abcd:1".parse::<Address>().is_err());
        let key = WriterKey::from_bytes([1u8; 32]);
        assert!(format!("{key}:x").parse::<Address>().is_err());
    }

    #[test]
    fn address_order() {
        let a = WriterKey::from_bytes([1u8; 32]);
        let b = WriterKey::from_bytes([2u8; 32]);
        let mut addrs = vec![Address::new(b, 0), Address::new(a, 3), Address::new(a, 1)];
        addrs.sort();
        assert_eq!(
            addrs,
            vec![Address::new(a, 1), Address::new(a, 3), Address::new(b, 0)]
        );
    }
}
