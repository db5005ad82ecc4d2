//! Writer logs.
//!
//! The append-only log primitive and its replication live outside this crate. A
//! [`WriterLog`] is the read side a collection needs, [`MemoryLog`] a simple
//! in-process implementation and [`Logs`] the registry of all logs known to a
//! collection.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{Error, Result},
    keys::{Address, WriterKey},
    version::RawEntry,
};

/// Read access to one append-only writer log.
#[async_trait]
pub trait WriterLog: fmt::Debug + Send + Sync + 'static {
    /// Identity of the writer.
    fn key(&self) -> WriterKey;

    /// Number of entries in the log.
    fn len(&self) -> u64;

    /// Whether the log has no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the entry at `seq`.
    ///
    /// Fails with [`Error::NotFound`] past the end of the log.
    async fn get(&self, seq: u64) -> Result<Bytes>;
}

/// An in-memory append-only log.
#[derive(Debug)]
pub struct MemoryLog {
    key: WriterKey,
    entries: RwLock<Vec<Bytes>>,
}

impl MemoryLog {
    /// Create an empty log for `key`.
    pub fn new(key: WriterKey) -> Self {
        Self {
            key,
            entries: Default::default(),
        }
    }

    /// Append raw bytes, returning the sequence number of the new entry.
    pub fn append(&self, value: impl Into<Bytes>) -> u64 {
        let mut entries = self.entries.write();
        entries.push(value.into());
        entries.len() as u64 - 1
    }

    /// Encode and append an entry, returning its address.
    pub fn append_entry(&self, entry: &RawEntry) -> Result<Address> {
        let seq = self.append(entry.encode()?);
        Ok(Address::new(self.key, seq))
    }
}

#[async_trait]
impl WriterLog for MemoryLog {
    fn key(&self) -> WriterKey {
        self.key
    }

    fn len(&self) -> u64 {
        self.entries.read().len() as u64
    }

    async fn get(&self, seq: u64) -> Result<Bytes> {
        let entries = self.entries.read();
        usize::try_from(seq)
            .ok()
            .and_then(|i| entries.get(i))
            .cloned()
            .ok_or_else(|| Error::version_not_found(&Address::new(self.key, seq)))
    }
}

/// All writer logs known to a collection.
#[derive(Debug, Clone, Default)]
pub struct Logs {
    logs: Arc<RwLock<BTreeMap<WriterKey, Arc<dyn WriterLog>>>>,
}

impl Logs {
    /// Add a log. Replaces a previously added log with the same key.
    pub fn insert(&self, log: Arc<dyn WriterLog>) {
        let key = log.key();
        debug!(writer = %key.fmt_short(), "add writer log");
        self.logs.write().insert(key, log);
    }

    /// Get the log for `key`.
    pub fn get(&self, key: &WriterKey) -> Option<Arc<dyn WriterLog>> {
        self.logs.read().get(key).cloned()
    }

    /// Keys of all known logs.
    pub fn keys(&self) -> Vec<WriterKey> {
        self.logs.read().keys().copied().collect()
    }

    /// Number of known logs.
    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    /// Whether no logs are known.
    pub fn is_empty(&self) -> bool {
        self.logs.read().is_empty()
    }
}
