//! Multi-writer document collections over append-only logs
//!
//! Every writer appends versions of records to its own log. A [`Collection`] reads
//! versions through a coalescing [`VersionCache`], resolves concurrent edits over the
//! version graph with [`resolve::resolve`], maintains a secondary [`IndexView`] and
//! full-text catalogs, and announces applied batches on a live [`EventStream`].

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod cache;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod log;
pub mod resolve;
pub mod schema;
pub mod store;
pub mod version;
pub mod view;

pub use self::{
    cache::VersionCache,
    collection::Collection,
    config::Config,
    error::{Error, Result},
    events::EventStream,
    keys::{Address, WriterKey},
    version::{RawEntry, Version},
    view::{IndexQuery, IndexView},
};
