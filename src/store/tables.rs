#![allow(missing_docs)]
// Table Definitions

use redb::{MultimapTableDefinition, TableDefinition};

/// Table: Meta
/// Key:   `&str`   # name, e.g. "indexes"
/// Value: `&[u8]`  # JSON encoded value
pub const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta-1");

/// Table: Postings
/// Key:   `(&str, &str, &[u8], u64)` # (IndexName, FieldAddress, Value, Lseq)
/// Value: `()`
pub const POSTINGS_TABLE: TableDefinition<PostingKey, ()> = TableDefinition::new("postings-1");
pub type PostingKey<'a> = (&'a str, &'a str, &'a [u8], u64);
pub type PostingKeyOwned = (String, String, Vec<u8>, u64);

/// Table: Heads
/// Key:   `&str` # Record id, empty for versions without id
/// Value: `&str` # Address of a current version
pub const HEADS_TABLE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("heads-1");

/// Table: Links
/// Key:   `&str` # Address of a version that another version links to
/// Value: `()`
pub const LINKS_TABLE: TableDefinition<&str, ()> = TableDefinition::new("links-1");

/// Table: Lseq
/// Key:   `u64`  # Logical sequence number, assigned in apply order
/// Value: `&str` # Address
pub const LSEQ_TABLE: TableDefinition<u64, &str> = TableDefinition::new("lseq-1");

/// Table: Lseq by address
/// Key:   `&str` # Address
/// Value: `u64`  # Logical sequence number
pub const LSEQ_BY_ADDRESS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("lseq-by-address-1");
