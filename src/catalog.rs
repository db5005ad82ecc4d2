//! Management of named full-text search catalogs.
//!
//! The [`CatalogManager`] keeps the set of known catalogs ("Index Info") in the meta
//! table of the [`Store`] and opens them against a [`CatalogStore`]. Readiness is
//! loaded once, concurrent callers of [`CatalogManager::ready`] share the load.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::{
    error::{Error, Result},
    store::{Store, INDEXES_KEY},
};

pub mod fields;
mod memory;

use self::fields::{to_fields, FieldSchema, TypeSchema};
pub use self::memory::{MemoryCatalog, MemoryCatalogStore};

/// Name of the default full-text catalog.
pub const TEXTDUMP: &str = "textdump";

/// A document added to a catalog.
pub type Document = serde_json::Map<String, Value>;

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Relevance, higher is better.
    pub score: f32,
    /// The matching document.
    pub doc: Document,
}

/// Options for [`CatalogStore::open_or_create`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOpts {
    /// Keep the catalog in memory only.
    pub ram: bool,
}

/// Storage backend for catalogs.
#[async_trait]
pub trait CatalogStore: fmt::Debug + Send + Sync + 'static {
    /// Open the catalog `name`, creating it with `fields` if it does not exist.
    async fn open_or_create(
        &self,
        name: &str,
        fields: &[FieldSchema],
        opts: OpenOpts,
    ) -> Result<Arc<dyn Catalog>>;

    /// Open an existing catalog.
    async fn open(&self, name: &str) -> Result<Arc<dyn Catalog>>;
}

/// A full-text search catalog.
#[async_trait]
pub trait Catalog: fmt::Debug + Send + Sync + 'static {
    /// Add a batch of documents.
    async fn add_documents(&self, docs: Vec<Document>) -> Result<()>;

    /// Search for `query`, returning at most `limit` hits by descending score.
    async fn query(&self, query: &str, limit: usize) -> Result<Vec<Hit>>;
}

/// Options for [`CatalogManager::make`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakeOpts {
    /// Keep the catalog on durable storage. Defaults to true.
    pub persist: bool,
    /// Prefix the common fields with the type name, for catalogs holding several types.
    pub prefix_common: bool,
}

impl Default for MakeOpts {
    fn default() -> Self {
        Self {
            persist: true,
            prefix_common: false,
        }
    }
}

/// What is known about a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// The type description the catalog was made from.
    pub schema: TypeSchema,
    /// Native fields of the catalog.
    pub fields: Vec<FieldSchema>,
    /// Whether the catalog is durable.
    pub persist: bool,
}

#[derive(Debug, Default)]
struct State {
    info: BTreeMap<String, IndexInfo>,
    catalogs: BTreeMap<String, Arc<dyn Catalog>>,
}

/// Manages the named catalogs of a collection.
#[derive(Debug)]
pub struct CatalogManager {
    store: Store,
    catalogs: Arc<dyn CatalogStore>,
    ready: OnceCell<()>,
    state: Mutex<State>,
}

impl CatalogManager {
    /// Create a manager. Nothing is loaded until [`Self::ready`] is called.
    pub fn new(store: Store, catalogs: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            catalogs,
            ready: OnceCell::new(),
            state: Default::default(),
        }
    }

    /// Load the Index Info, re-open all known catalogs and ensure [`TEXTDUMP`] exists.
    ///
    /// Only the first call does any work. Concurrent callers wait for it.
    pub async fn ready(&self) -> Result<()> {
        self.ready.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        let info = self.load_info()?;
        let mut state = self.state.lock().await;
        for (name, info) in info {
            let catalog = match self.catalogs.open(&name).await {
                Ok(catalog) => catalog,
                Err(err) if err.is_not_found() => {
                    warn!(%name, "catalog missing from catalog store, recreating");
                    self.catalogs
                        .open_or_create(&name, &info.fields, OpenOpts { ram: false })
                        .await?
                }
                Err(err) => return Err(err),
            };
            state.catalogs.insert(name.clone(), catalog);
            state.info.insert(name, info);
        }
        if !state.info.contains_key(TEXTDUMP) {
            self.create(&mut state, TEXTDUMP, textdump_schema(), MakeOpts::default())
                .await?;
        }
        info!(catalogs = state.catalogs.len(), "catalogs ready");
        Ok(())
    }

    fn load_info(&self) -> Result<BTreeMap<String, IndexInfo>> {
        let Some(bytes) = self.store.get_meta(INDEXES_KEY)? else {
            debug!("no index info stored");
            return Ok(Default::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(info) => Ok(info),
            Err(err) => {
                warn!("ignoring corrupt index info: {err}");
                Ok(Default::default())
            }
        }
    }

    /// Create the catalog `name` unless it exists.
    ///
    /// Without a schema the catalog only holds the common fields.
    pub async fn make(
        &self,
        name: &str,
        schema: Option<TypeSchema>,
        opts: Option<MakeOpts>,
    ) -> Result<()> {
        self.ready().await?;
        let mut state = self.state.lock().await;
        if state.catalogs.contains_key(name) {
            debug!(%name, "catalog exists");
            return Ok(());
        }
        let schema = schema.unwrap_or_default();
        self.create(&mut state, name, schema, opts.unwrap_or_default())
            .await
    }

    async fn create(
        &self,
        state: &mut State,
        name: &str,
        schema: TypeSchema,
        opts: MakeOpts,
    ) -> Result<()> {
        let fields = to_fields(&schema, opts.prefix_common);
        let catalog = self
            .catalogs
            .open_or_create(name, &fields, OpenOpts { ram: !opts.persist })
            .await?;
        let info = IndexInfo {
            schema,
            fields,
            persist: opts.persist,
        };
        let mut next = state.info.clone();
        next.insert(name.to_string(), info);
        if opts.persist {
            self.persist_info(&next)?;
        }
        state.info = next;
        state.catalogs.insert(name.to_string(), catalog);
        info!(%name, persist = opts.persist, "created catalog");
        Ok(())
    }

    fn persist_info(&self, info: &BTreeMap<String, IndexInfo>) -> Result<()> {
        let durable: BTreeMap<&String, &IndexInfo> =
            info.iter().filter(|(_, info)| info.persist).collect();
        let bytes = serde_json::to_vec(&durable)?;
        self.store.put_meta(INDEXES_KEY, &bytes)
    }

    /// Get a catalog by name.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Catalog>> {
        self.ready().await?;
        let state = self.state.lock().await;
        state
            .catalogs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    /// Get the type description a catalog was made from.
    pub async fn get_schema(&self, name: &str) -> Result<TypeSchema> {
        self.ready().await?;
        let state = self.state.lock().await;
        state
            .info
            .get(name)
            .map(|info| info.schema.clone())
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))
    }

    /// Get the Index Info of all catalogs.
    pub async fn get_info(&self) -> Result<BTreeMap<String, IndexInfo>> {
        self.ready().await?;
        Ok(self.state.lock().await.info.clone())
    }
}

/// The type description of the [`TEXTDUMP`] catalog.
pub fn textdump_schema() -> TypeSchema {
    TypeSchema::with_strings(None, ["title", "body"])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use testresult::TestResult;
    use tracing_test::traced_test;

    use super::*;

    fn new_manager(store: &Store, catalogs: &MemoryCatalogStore) -> CatalogManager {
        CatalogManager::new(store.clone(), Arc::new(catalogs.clone()))
    }

    fn stored_info(store: &Store) -> Result<BTreeMap<String, IndexInfo>> {
        let bytes = store.get_meta(INDEXES_KEY)?.unwrap_or_default();
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    #[traced_test]
    async fn ready_creates_textdump() -> TestResult {
        let store = Store::in_memory()?;
        let catalogs = MemoryCatalogStore::new();
        let manager = new_manager(&store, &catalogs);
        let (a, b) = tokio::join!(manager.ready(), manager.ready());
        a?;
        b?;
        assert_eq!(catalogs.created(), 1);
        let info = manager.get_info().await?;
        let names: Vec<_> = info[TEXTDUMP].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "source", "seq", "type", "body", "title"]);
        assert!(stored_info(&store)?.contains_key(TEXTDUMP));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn make_is_idempotent() -> TestResult {
        let store = Store::in_memory()?;
        let catalogs = MemoryCatalogStore::new();
        let manager = new_manager(&store, &catalogs);
        manager.make(TEXTDUMP, None, None).await?;
        manager.make(TEXTDUMP, None, None).await?;
        assert_eq!(catalogs.created(), 1);
        let stored = stored_info(&store)?;
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key(TEXTDUMP));

        let schema = TypeSchema::with_strings(Some("doc"), ["title"]);
        manager.make("docs", Some(schema.clone()), None).await?;
        manager.make("docs", None, None).await?;
        assert_eq!(catalogs.created(), 2);
        assert_eq!(manager.get_schema("docs").await?, schema);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_index() -> TestResult {
        let store = Store::in_memory()?;
        let manager = new_manager(&store, &MemoryCatalogStore::new());
        let err = manager.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
        let err = manager.get_schema("nope").await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn memory_catalogs_are_not_persisted() -> TestResult {
        let store = Store::in_memory()?;
        let manager = new_manager(&store, &MemoryCatalogStore::new());
        let opts = MakeOpts {
            persist: false,
            ..Default::default()
        };
        manager.make("scratch", None, Some(opts)).await?;
        assert!(manager.get("scratch").await.is_ok());
        assert!(manager.get_info().await?.contains_key("scratch"));
        assert!(!stored_info(&store)?.contains_key("scratch"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn reopen_known_catalogs() -> TestResult {
        let store = Store::in_memory()?;
        let catalogs = MemoryCatalogStore::new();
        new_manager(&store, &catalogs)
            .make("docs", Some(TypeSchema::with_strings(Some("doc"), ["title"])), None)
            .await?;
        assert_eq!(catalogs.created(), 2);

        let manager = new_manager(&store, &catalogs);
        manager.ready().await?;
        assert_eq!(catalogs.created(), 2);
        assert!(manager.get("docs").await.is_ok());

        // a fresh catalog store lost the catalogs, they are recreated from the info
        let fresh = MemoryCatalogStore::new();
        let manager = CatalogManager::new(store.clone(), Arc::new(fresh.clone()));
        manager.ready().await?;
        assert_eq!(fresh.created(), 2);
        assert!(logs_contain("recreating"));
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn corrupt_info_is_treated_as_empty() -> TestResult {
        let store = Store::in_memory()?;
        store.put_meta(INDEXES_KEY, b"{ not json")?;
        let manager = new_manager(&store, &MemoryCatalogStore::new());
        manager.ready().await?;
        assert_eq!(manager.get_info().await?.len(), 1);
        assert!(logs_contain("corrupt index info"));
        Ok(())
    }

    #[derive(Debug, Default)]
    struct FailingStore {
        calls: AtomicU64,
        inner: MemoryCatalogStore,
    }

    #[async_trait]
    impl CatalogStore for FailingStore {
        async fn open_or_create(
            &self,
            name: &str,
            fields: &[FieldSchema],
            opts: OpenOpts,
        ) -> Result<Arc<dyn Catalog>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(Error::Storage("disk full".into()));
            }
            self.inner.open_or_create(name, fields, opts).await
        }

        async fn open(&self, name: &str) -> Result<Arc<dyn Catalog>> {
            self.inner.open(name).await
        }
    }

    #[tokio::test]
    async fn failed_make_keeps_info() -> TestResult {
        let store = Store::in_memory()?;
        let manager = CatalogManager::new(store.clone(), Arc::new(FailingStore::default()));
        let before = stored_info(&store).ok();
        assert!(before.is_none());
        assert!(manager.make("docs", None, None).await.is_err());
        let stored = stored_info(&store)?;
        assert_eq!(stored.keys().collect::<Vec<_>>(), vec![TEXTDUMP]);
        assert!(matches!(
            manager.get("docs").await,
            Err(Error::IndexNotFound(_))
        ));
        Ok(())
    }
}
