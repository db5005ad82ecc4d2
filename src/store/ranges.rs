//! Ranges on [`redb`] tables
//!
//! A [`TableRange`] keeps a [`ReadTransaction`], a [`ReadOnlyTable`] and a [`Range`]
//! together so that lazy iterators over a table can be returned from the store.

use std::{fmt, sync::Arc};

use redb::{
    Database, Key as RedbKey, Range, ReadOnlyTable, ReadTransaction, StorageError, TableError,
    Value as RedbValue,
};

use crate::error::{Error, Result};

/// A range reader for a [`ReadOnlyTable`] that can be stored in a struct.
pub struct TableRange<K: RedbKey + 'static, V: RedbValue + 'static> {
    #[allow(dead_code)]
    read_tx: ReadTransaction,
    table: ReadOnlyTable<K, V>,
    range: Range<'static, K, V>,
    reverse: bool,
}

impl<K: RedbKey + 'static, V: RedbValue + 'static> TableRange<K, V> {
    /// Create a new [`TableRange`]
    pub fn new<TF, RF>(db: &Arc<Database>, table_fn: TF, range_fn: RF) -> Result<Self>
    where
        TF: FnOnce(&ReadTransaction) -> Result<ReadOnlyTable<K, V>, TableError>,
        RF: FnOnce(&ReadOnlyTable<K, V>) -> Result<Range<'static, K, V>, StorageError>,
    {
        let read_tx = db.begin_read()?;
        let table = table_fn(&read_tx)?;
        let range = range_fn(&table)?;
        Ok(Self {
            read_tx,
            table,
            range,
            reverse: false,
        })
    }

    /// Iterate the range from its end to its start.
    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Get a reference to the [`ReadOnlyTable`];
    pub fn table(&self) -> &ReadOnlyTable<K, V> {
        &self.table
    }

    /// Get the next row in iteration direction, mapped through `map`.
    pub fn next_mapped<T>(
        &mut self,
        map: impl for<'x> Fn(K::SelfType<'x>, V::SelfType<'x>) -> T,
    ) -> Option<Result<T>> {
        let next = match self.reverse {
            false => self.range.next(),
            true => self.range.next_back(),
        };
        next.map(|r| {
            r.map_err(Error::from)
                .map(|(k, v)| map(k.value(), v.value()))
        })
    }
}

impl<K: RedbKey + 'static, V: RedbValue + 'static> fmt::Debug for TableRange<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableRange({:?})", self.table())
    }
}
