//! A collection of records kept in multiple writer logs.
//!
//! The [`Collection`] reads versions through the [`VersionCache`], resolves batches of
//! new versions against the version graph, and keeps the resolved state, the secondary
//! index and the search catalogs up to date. Every applied batch is announced on the
//! [`EventStream`].

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::{
    cache::{CacheStats, VersionCache},
    catalog::{CatalogManager, CatalogStore, Document, Hit, IndexInfo, TEXTDUMP},
    config::{Config, StorageConfig},
    error::{Error, Result},
    events::{EventStream, Message, ReadOpts, ReadStream},
    keys::Address,
    log::{Logs, MemoryLog},
    resolve::{resolve, LinkState, Resolution},
    schema::{Schema, TypeSpec},
    store::{Store, StoreUpdate, SCHEMA_KEY},
    version::{RawEntry, Version},
    view::{IndexQuery, IndexView, PostingIter, ResolvedRecord},
};

/// Name of the secondary index of a collection.
pub const BASIC_INDEX: &str = "basic";

/// Event name of applied batches.
pub const UPDATE_EVENT: &str = "update";

/// Outcome of [`Collection::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// How the batch was resolved.
    pub resolution: Resolution,
    /// Logical sequence numbers assigned to the current versions, in order.
    pub lseqs: Range<u64>,
    /// Id of the announcing event, if one was pushed.
    pub event_id: Option<u64>,
}

/// A multi-writer collection of records.
#[derive(Debug)]
pub struct Collection {
    cache: VersionCache,
    store: Store,
    schema: Arc<RwLock<Schema>>,
    view: IndexView,
    catalogs: CatalogManager,
    events: EventStream,
    write_lock: tokio::sync::Mutex<()>,
}

impl Collection {
    /// Open a collection reading from `logs`.
    pub async fn open(
        config: &Config,
        logs: Logs,
        catalogs: Arc<dyn CatalogStore>,
    ) -> Result<Self> {
        let store = match &config.storage {
            StorageConfig::Memory => Store::in_memory()?,
            StorageConfig::Persistent(path) => Store::persistent(path)?,
        };
        let schema = match store.get_meta(SCHEMA_KEY)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => Schema::new(config.namespace.clone()),
        };
        let schema = Arc::new(RwLock::new(schema));
        let catalogs = CatalogManager::new(store.clone(), catalogs);
        catalogs.ready().await?;
        let this = Self {
            cache: VersionCache::new(logs, config.cache_capacity),
            view: IndexView::new(BASIC_INDEX, store.clone(), schema.clone()),
            store,
            schema,
            catalogs,
            events: EventStream::new(config.event_capacity),
            write_lock: Default::default(),
        };
        info!(namespace = %this.schema.read().namespace(), "opened collection");
        Ok(this)
    }

    /// The writer logs of this collection.
    pub fn logs(&self) -> &Logs {
        self.cache.logs()
    }

    /// A snapshot of the schema.
    pub fn schema(&self) -> Schema {
        self.schema.read().clone()
    }

    /// Add or replace a record type. Returns its namespaced name.
    ///
    /// Types with searchable fields get a search catalog named after the type.
    pub async fn put_schema(&self, spec: TypeSpec) -> Result<String> {
        let _guard = self.write_lock.lock().await;
        let (name, bytes, type_schema) = {
            let mut schema = self.schema.write();
            let name = schema.add_type(spec);
            let type_schema = schema.get_type(&name).map(TypeSpec::to_type_schema);
            (name, serde_json::to_vec(&*schema)?, type_schema)
        };
        self.store.put_meta(SCHEMA_KEY, &bytes)?;
        if let Some(type_schema) = type_schema.filter(|s| !s.properties.is_empty()) {
            self.catalogs.make(&name, Some(type_schema), None).await?;
        }
        debug!(%name, "put schema");
        Ok(name)
    }

    /// Append an entry to a local writer log and apply it.
    pub async fn append(&self, log: &MemoryLog, entry: RawEntry) -> Result<Address> {
        let address = log.append_entry(&entry)?;
        self.apply(&[address]).await?;
        Ok(address)
    }

    /// Apply a batch of versions.
    ///
    /// The versions are resolved against the version graph and the current versions
    /// are added to the search catalogs. Then heads, links, logical sequence numbers
    /// and postings are committed at once. Versions that were applied before are
    /// skipped. If resolution or a catalog fails nothing is committed and the batch
    /// can be retried. A batch that changes nothing is not announced.
    #[instrument(skip_all, fields(batch = addresses.len()))]
    pub async fn apply(&self, addresses: &[Address]) -> Result<ApplyOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut batch = Vec::with_capacity(addresses.len());
        for address in addresses {
            if self.store.lseq_of(address)?.is_some() {
                debug!(%address, "skip applied version");
                continue;
            }
            batch.push(self.cache.get(address).await?);
        }
        let resolution = resolve(&batch, &Links(self)).await?;

        let mut changed = !resolution.current.is_empty();
        for version in &resolution.superseded {
            changed |= !self.store.is_linked(&version.address)?;
        }
        let start = self.store.next_lseq()?;
        if !changed {
            debug!(superseded = resolution.superseded.len(), "batch changed nothing");
            return Ok(ApplyOutcome {
                resolution,
                lseqs: start..start,
                event_id: None,
            });
        }
        let records: Vec<ResolvedRecord> = resolution
            .current
            .iter()
            .zip(start..)
            .map(|(version, lseq)| ResolvedRecord {
                lseq,
                version: version.clone(),
            })
            .collect();
        let lseqs = start..start + records.len() as u64;

        let linked: BTreeSet<Address> = batch
            .iter()
            .flat_map(|v| v.links.iter().copied())
            .collect();
        let postings = self.view.map_batch(&records);
        let update = StoreUpdate {
            linked: linked.into_iter().collect(),
            heads_removed: resolution
                .superseded
                .iter()
                .map(|v| (head_id(v), v.address))
                .collect(),
            heads_added: records
                .iter()
                .map(|r| (head_id(&r.version), r.version.address))
                .collect(),
            lseqs: records.iter().map(|r| (r.lseq, r.version.address)).collect(),
            postings: self.view.posting_keys(&postings),
        };
        self.index_documents(&records).await?;
        self.store.commit(&update)?;

        let event_id = self.announce(&resolution, &lseqs);
        Ok(ApplyOutcome {
            resolution,
            lseqs,
            event_id,
        })
    }

    async fn index_documents(&self, records: &[ResolvedRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let docs = records.iter().map(textdump_document).collect();
        self.catalogs.get(TEXTDUMP).await?.add_documents(docs).await?;

        let schema = self.schema();
        for ty in schema.types() {
            let fields: Vec<&String> = ty
                .fields
                .iter()
                .filter(|(_, f)| f.index.search)
                .map(|(name, _)| name)
                .collect();
            if fields.is_empty() {
                continue;
            }
            let docs: Vec<Document> = records
                .iter()
                .filter(|r| {
                    r.version
                        .ty
                        .as_deref()
                        .is_some_and(|t| schema.resolve_type(t) == ty.name)
                })
                .map(|r| {
                    let mut doc = common_fields(r);
                    for name in &fields {
                        if let Some(value) = r.version.field(name) {
                            doc.insert(name.to_string(), value.clone());
                        }
                    }
                    doc
                })
                .collect();
            if docs.is_empty() {
                continue;
            }
            match self.catalogs.get(&ty.name).await {
                Ok(catalog) => catalog.add_documents(docs).await?,
                Err(Error::IndexNotFound(name)) => warn!(%name, "no catalog for type"),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn announce(&self, resolution: &Resolution, lseqs: &Range<u64>) -> Option<u64> {
        let addresses = |versions: &[Version]| -> Vec<String> {
            versions.iter().map(|v| v.address.to_string()).collect()
        };
        let data = json!({
            "from": lseqs.start,
            "to": lseqs.end,
            "current": addresses(&resolution.current),
            "superseded": addresses(&resolution.superseded),
        });
        match self.events.push(UPDATE_EVENT, data) {
            Ok(id) => Some(id),
            Err(err) => {
                debug!("not announcing batch: {err}");
                None
            }
        }
    }

    /// Current versions of a record. Concurrent edits yield more than one version.
    pub async fn get(&self, id: &str) -> Result<Vec<Version>> {
        let mut versions = Vec::new();
        for address in self.store.heads(id)? {
            versions.push(self.cache.get(&address).await?);
        }
        Ok(versions)
    }

    /// Scan the secondary index.
    pub fn postings(&self, query: &IndexQuery) -> Result<PostingIter> {
        self.view.query(query)
    }

    /// Address of the version applied at logical sequence number `lseq`.
    pub fn address_of(&self, lseq: u64) -> Result<Option<Address>> {
        self.store.address_of(lseq)
    }

    /// Scan the secondary index and load the matching versions.
    pub async fn query(&self, query: &IndexQuery) -> Result<Vec<Version>> {
        let lseqs = self
            .postings(query)?
            .map(|p| p.map(|p| p.lseq))
            .collect::<Result<Vec<_>>>()?;
        let mut versions = Vec::with_capacity(lseqs.len());
        for lseq in lseqs {
            let address = self
                .address_of(lseq)?
                .ok_or_else(|| Error::NotFound(format!("lseq {lseq}")))?;
            versions.push(self.cache.get(&address).await?);
        }
        Ok(versions)
    }

    /// Full-text search in a catalog.
    pub async fn search(&self, index: &str, text: &str, limit: usize) -> Result<Vec<Hit>> {
        self.catalogs.get(index).await?.query(text, limit).await
    }

    /// The Index Info of all catalogs.
    pub async fn index_info(&self) -> Result<BTreeMap<String, IndexInfo>> {
        self.catalogs.get_info().await
    }

    /// The catalog manager.
    pub fn catalogs(&self) -> &CatalogManager {
        &self.catalogs
    }

    /// Subscribe to applied batches.
    pub fn subscribe(&self, opts: ReadOpts) -> ReadStream<Arc<Message>> {
        self.events.create_read_stream(opts)
    }

    /// Statistics of the version cache.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop all postings and derive them again from the current heads.
    ///
    /// Returns the number of postings written.
    pub async fn rebuild(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.view.reset()?;
        let mut records = Vec::new();
        for (_id, address) in self.store.all_heads()? {
            let Some(lseq) = self.store.lseq_of(&address)? else {
                warn!(%address, "head without lseq");
                continue;
            };
            let version = self.cache.get(&address).await?;
            records.push(ResolvedRecord { lseq, version });
        }
        let postings = self.view.map_batch(&records);
        self.view.put(&postings)?;
        info!(records = records.len(), postings = postings.len(), "rebuilt index");
        Ok(postings.len())
    }

    /// Detach all subscribers. Later batches are not announced.
    pub fn close(&self) {
        self.events.close();
    }
}

struct Links<'a>(&'a Collection);

#[async_trait]
impl LinkState for Links<'_> {
    fn is_linked(&self, address: &Address) -> Result<bool> {
        self.0.store.is_linked(address)
    }

    async fn load(&self, address: &Address) -> Result<Version> {
        self.0.cache.get(address).await
    }
}

fn head_id(version: &Version) -> String {
    version.id.clone().unwrap_or_default()
}

fn common_fields(record: &ResolvedRecord) -> Document {
    let version = &record.version;
    let mut doc = Document::new();
    doc.insert("id".into(), json!(version.id.clone().unwrap_or_default()));
    doc.insert("source".into(), json!(version.key().to_string()));
    doc.insert("seq".into(), json!(version.seq().to_string()));
    doc.insert("type".into(), json!(version.ty.clone().unwrap_or_default()));
    doc
}

fn textdump_document(record: &ResolvedRecord) -> Document {
    let version = &record.version;
    let mut doc = common_fields(record);
    let title = match version.field("title") {
        Some(Value::String(title)) => title.clone(),
        _ => String::new(),
    };
    let body = match version.field("body") {
        Some(Value::String(body)) => body.clone(),
        _ => version.value.to_string(),
    };
    doc.insert("title".into(), Value::String(title));
    doc.insert("body".into(), Value::String(body));
    doc
}
