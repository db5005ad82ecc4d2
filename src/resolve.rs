//! Resolution of concurrent versions.
//!
//! Versions form a DAG through their `links`. Given a batch of newly appended
//! versions, [`resolve`] partitions them (plus previously stored versions the batch
//! links to) into the versions that are superseded and those that form the new
//! current set.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    keys::Address,
    version::Version,
};

/// Access to the state a batch is resolved against.
#[async_trait]
pub trait LinkState: Send + Sync {
    /// Whether a version outside the batch already links to `address`.
    fn is_linked(&self, address: &Address) -> Result<bool>;

    /// Load a previously stored version.
    async fn load(&self, address: &Address) -> Result<Version>;
}

/// Outcome of resolving a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Versions that are linked over by another version.
    ///
    /// Batch versions come first, in batch order, followed by previously stored
    /// versions in address order.
    pub superseded: Vec<Version>,
    /// Versions of the batch that nothing links to, in batch order.
    pub current: Vec<Version>,
}

impl Resolution {
    /// Group the current versions by logical record id.
    ///
    /// Versions without an id are grouped under `None`.
    pub fn heads_by_id(&self) -> BTreeMap<Option<&str>, Vec<&Version>> {
        let mut heads: BTreeMap<Option<&str>, Vec<&Version>> = BTreeMap::new();
        for version in &self.current {
            heads.entry(version.id.as_deref()).or_default().push(version);
        }
        heads
    }

    /// Whether resolving the batch changed nothing.
    pub fn is_empty(&self) -> bool {
        self.superseded.is_empty() && self.current.is_empty()
    }
}

/// Resolve a batch of versions.
///
/// The whole batch is analyzed before any version is classified, so versions may
/// link to versions that appear later in the batch. Deleted versions that nothing
/// links to are dropped: they are neither current nor superseded.
///
/// Resolution has no side effects. If `state` fails, the error is returned as
/// [`Error::Resolution`] and the batch must be retried as a whole.
pub async fn resolve(batch: &[Version], state: &impl LinkState) -> Result<Resolution> {
    let mut seen = HashSet::new();
    let batch: Vec<&Version> = batch
        .iter()
        .filter(|version| seen.insert(version.address))
        .collect();

    let mut linked_away = Vec::new();
    let mut candidates = Vec::new();
    for version in &batch {
        if state.is_linked(&version.address).map_err(Error::resolution)? {
            linked_away.push(*version);
        } else {
            candidates.push(*version);
        }
    }

    let mut pending_links: BTreeSet<Address> = batch
        .iter()
        .flat_map(|version| version.links.iter().copied())
        .collect();

    let mut superseded = Vec::new();
    let mut current = Vec::new();
    for version in &linked_away {
        pending_links.remove(&version.address);
    }
    for version in candidates {
        if pending_links.remove(&version.address) {
            superseded.push(version);
        } else if version.deleted {
            trace!(address = %version.address, "drop tombstone");
        } else {
            current.push(version);
        }
    }
    // linked over before this batch arrived: never current. candidates and
    // linked_away are disjoint, so nothing is pushed twice.
    superseded.extend(linked_away.iter().copied());
    let position: HashMap<Address, usize> = batch
        .iter()
        .enumerate()
        .map(|(i, version)| (version.address, i))
        .collect();
    superseded.sort_by_key(|v| position.get(&v.address).copied());

    let mut superseded: Vec<Version> = superseded.into_iter().cloned().collect();
    for address in pending_links {
        let version = state.load(&address).await.map_err(Error::resolution)?;
        superseded.push(version);
    }

    let res = Resolution {
        superseded,
        current: current.into_iter().cloned().collect(),
    };
    debug!(
        batch = batch.len(),
        current = res.current.len(),
        superseded = res.superseded.len(),
        "resolved batch"
    );
    Ok(res)
}
