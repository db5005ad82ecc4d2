//! Versions: decoded entries of writer logs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::Result,
    keys::{Address, WriterKey},
};

/// An entry as it is appended to a writer log.
///
/// Entries are encoded as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Logical id of the record this entry is a version of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Type name of the record.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    /// Payload.
    #[serde(default)]
    pub value: Value,
    /// Tombstone marker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    /// Causal predecessors of this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Address>,
    /// Creation time in milliseconds since the unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl RawEntry {
    /// Create an entry for record `id` of type `ty`.
    pub fn new(ty: impl Into<String>, id: impl Into<String>, value: Value) -> Self {
        Self {
            id: Some(id.into()),
            ty: Some(ty.into()),
            value,
            ..Default::default()
        }
    }

    /// Set the causal predecessors.
    pub fn with_links(mut self, links: impl IntoIterator<Item = Address>) -> Self {
        self.links = links.into_iter().collect();
        self
    }

    /// Mark this entry as a tombstone.
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Encode to the log wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the log wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Position of an entry in a writer log, handed to [`MapFn`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPosition {
    /// The writer log.
    pub key: WriterKey,
    /// Position in the log.
    pub seq: u64,
}

impl From<LogPosition> for Address {
    fn from(pos: LogPosition) -> Self {
        Address::new(pos.key, pos.seq)
    }
}

/// Transforms a decoded log entry into the externally visible [`Version`].
pub type MapFn = Arc<dyn Fn(RawEntry, LogPosition) -> Result<Version> + Send + Sync + 'static>;

/// One entry of a writer log, decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    /// Where this version lives.
    pub address: Address,
    /// Logical id of the record.
    pub id: Option<String>,
    /// Type name of the record.
    #[serde(rename = "type")]
    pub ty: Option<String>,
    /// Payload.
    pub value: Value,
    /// Tombstone marker.
    pub deleted: bool,
    /// Causal predecessors.
    pub links: Vec<Address>,
    /// Creation time in milliseconds since the unix epoch.
    pub timestamp: Option<u64>,
}

impl Version {
    /// The default mapping from a raw entry to a version.
    pub fn from_entry(entry: RawEntry, pos: LogPosition) -> Result<Self> {
        Ok(Self {
            address: pos.into(),
            id: entry.id,
            ty: entry.ty,
            value: entry.value,
            deleted: entry.deleted,
            links: entry.links,
            timestamp: entry.timestamp,
        })
    }

    /// Writer log of this version.
    pub fn key(&self) -> &WriterKey {
        &self.address.key
    }

    /// Position of this version in its writer log.
    pub fn seq(&self) -> u64 {
        self.address.seq
    }

    /// Get a top-level field of the payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.as_object().and_then(|o| o.get(name))
    }
}
