//! Persistent state of a collection.
//!
//! A sorted key-value store on top of [`redb`] holding index metadata, secondary
//! index postings and the resolved state of the version graph: the current heads of
//! every record, the set of linked-over versions and the logical sequence numbers
//! assigned to applied versions.

use std::{ops::Bound, path::Path, sync::Arc};

use redb::{
    backends::InMemoryBackend, Database, ReadableMultimapTable, ReadableTable, WriteTransaction,
};
use tracing::{debug, info};

use crate::{
    error::{Error, Result},
    keys::Address,
};

pub(crate) mod ranges;
pub(crate) mod tables;

use self::tables::{
    PostingKeyOwned, HEADS_TABLE, LINKS_TABLE, LSEQ_BY_ADDRESS_TABLE, LSEQ_TABLE, META_TABLE,
    POSTINGS_TABLE,
};

/// Key of the index info map in the meta table.
pub const INDEXES_KEY: &str = "indexes";
/// Key of the schema in the meta table.
pub const SCHEMA_KEY: &str = "schema";

/// Redb backed store for a collection.
#[derive(Debug, Clone)]
pub struct Store {
    db: Arc<Database>,
}

/// Changes committed atomically by [`Store::commit`].
#[derive(Debug, Default)]
pub struct StoreUpdate {
    /// Versions that are now linked over.
    pub linked: Vec<Address>,
    /// Heads to remove, as `(record id, address)`.
    pub heads_removed: Vec<(String, Address)>,
    /// Heads to add, as `(record id, address)`.
    pub heads_added: Vec<(String, Address)>,
    /// Logical sequence numbers assigned to versions.
    pub lseqs: Vec<(u64, Address)>,
    /// Postings to insert, as `(index name, field address, value, lseq)`.
    pub postings: Vec<PostingKeyOwned>,
}

impl StoreUpdate {
    /// Whether this update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.linked.is_empty()
            && self.heads_removed.is_empty()
            && self.heads_added.is_empty()
            && self.lseqs.is_empty()
            && self.postings.is_empty()
    }
}

impl Store {
    /// Open or create a store at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading collection database from {}", path.to_string_lossy());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::builder().create(path)?;
        Self::open(db)
    }

    /// Create a store that lives in memory only.
    pub fn in_memory() -> Result<Self> {
        debug!("using in-memory collection database");
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::open(db)
    }

    /// Create all tables of an opened database.
    pub fn open(db: Database) -> Result<Self> {
        let write_tx = db.begin_write()?;
        {
            let _table = write_tx.open_table(META_TABLE)?;
            let _table = write_tx.open_table(POSTINGS_TABLE)?;
            let _table = write_tx.open_multimap_table(HEADS_TABLE)?;
            let _table = write_tx.open_table(LINKS_TABLE)?;
            let _table = write_tx.open_table(LSEQ_TABLE)?;
            let _table = write_tx.open_table(LSEQ_BY_ADDRESS_TABLE)?;
        }
        write_tx.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub(crate) fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Get a value from the meta table.
    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(META_TABLE)?;
        let value = table.get(key)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    /// Replace a value in the meta table.
    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(META_TABLE)?;
            table.insert(key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Whether a version has been linked over by an applied version.
    pub fn is_linked(&self, address: &Address) -> Result<bool> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(LINKS_TABLE)?;
        let linked = table.get(address.to_string().as_str())?.is_some();
        Ok(linked)
    }

    /// Current heads of a record.
    pub fn heads(&self, id: &str) -> Result<Vec<Address>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_multimap_table(HEADS_TABLE)?;
        let mut heads = Vec::new();
        for value in table.get(id)? {
            heads.push(value?.value().parse()?);
        }
        Ok(heads)
    }

    /// Current heads of all records, as `(record id, address)`.
    pub fn all_heads(&self) -> Result<Vec<(String, Address)>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_multimap_table(HEADS_TABLE)?;
        let mut heads = Vec::new();
        for row in table.iter()? {
            let (id, values) = row?;
            let id = id.value().to_string();
            for value in values {
                heads.push((id.clone(), value?.value().parse()?));
            }
        }
        Ok(heads)
    }

    /// Address of the version with logical sequence number `lseq`.
    pub fn address_of(&self, lseq: u64) -> Result<Option<Address>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(LSEQ_TABLE)?;
        let Some(value) = table.get(lseq)? else {
            return Ok(None);
        };
        Ok(Some(value.value().parse()?))
    }

    /// Logical sequence number assigned to a version, if it was applied.
    pub fn lseq_of(&self, address: &Address) -> Result<Option<u64>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(LSEQ_BY_ADDRESS_TABLE)?;
        let lseq = table.get(address.to_string().as_str())?.map(|v| v.value());
        Ok(lseq)
    }

    /// The next unassigned logical sequence number.
    pub fn next_lseq(&self) -> Result<u64> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(LSEQ_TABLE)?;
        let next = table.last()?.map(|(k, _)| k.value() + 1).unwrap_or(0);
        Ok(next)
    }

    /// Apply an update in a single write transaction.
    pub fn commit(&self, update: &StoreUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let tx = self.db.begin_write()?;
        write_update(&tx, update)?;
        tx.commit()?;
        debug!(
            linked = update.linked.len(),
            heads_added = update.heads_added.len(),
            heads_removed = update.heads_removed.len(),
            postings = update.postings.len(),
            "commit"
        );
        Ok(())
    }

    /// Remove all postings of an index. Returns the number of removed postings.
    pub fn clear_postings(&self, index: &str) -> Result<usize> {
        let tx = self.db.begin_write()?;
        let removed = {
            let mut table = tx.open_table(POSTINGS_TABLE)?;
            let start: (&str, &str, &[u8], u64) = (index, "", &[], 0);
            let end_index = format!("{index}\0");
            let end: (&str, &str, &[u8], u64) = (&end_index, "", &[], 0);
            let mut keys: Vec<PostingKeyOwned> = Vec::new();
            for row in table.range((Bound::Included(start), Bound::Excluded(end)))? {
                let (key, _) = row?;
                let (i, f, v, l) = key.value();
                keys.push((i.to_string(), f.to_string(), v.to_vec(), l));
            }
            for (i, f, v, l) in &keys {
                table.remove((i.as_str(), f.as_str(), v.as_slice(), *l))?;
            }
            keys.len()
        };
        tx.commit()?;
        debug!(%index, removed, "cleared postings");
        Ok(removed)
    }
}

fn write_update(tx: &WriteTransaction, update: &StoreUpdate) -> Result<(), Error> {
    let mut links = tx.open_table(LINKS_TABLE)?;
    for address in &update.linked {
        links.insert(address.to_string().as_str(), ())?;
    }
    let mut heads = tx.open_multimap_table(HEADS_TABLE)?;
    for (id, address) in &update.heads_removed {
        heads.remove(id.as_str(), address.to_string().as_str())?;
    }
    for (id, address) in &update.heads_added {
        heads.insert(id.as_str(), address.to_string().as_str())?;
    }
    let mut lseqs = tx.open_table(LSEQ_TABLE)?;
    let mut by_address = tx.open_table(LSEQ_BY_ADDRESS_TABLE)?;
    for (lseq, address) in &update.lseqs {
        let address = address.to_string();
        lseqs.insert(*lseq, address.as_str())?;
        by_address.insert(address.as_str(), *lseq)?;
    }
    let mut postings = tx.open_table(POSTINGS_TABLE)?;
    for (index, field, value, lseq) in &update.postings {
        postings.insert((index.as_str(), field.as_str(), value.as_slice(), *lseq), ())?;
    }
    Ok(())
}
