//! An in-process catalog store.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use super::{fields::FieldSchema, Catalog, CatalogStore, Document, Hit, OpenOpts};
use crate::error::{Error, Result};

/// A [`CatalogStore`] keeping all catalogs in memory.
///
/// Clones share the same catalogs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalogStore {
    catalogs: Arc<Mutex<HashMap<String, Arc<MemoryCatalog>>>>,
    created: Arc<AtomicU64>,
}

impl MemoryCatalogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of catalogs created so far.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn open_or_create(
        &self,
        name: &str,
        fields: &[FieldSchema],
        opts: OpenOpts,
    ) -> Result<Arc<dyn Catalog>> {
        let mut catalogs = self.catalogs.lock();
        if let Some(catalog) = catalogs.get(name) {
            return Ok(catalog.clone());
        }
        debug!(%name, ram = opts.ram, fields = fields.len(), "create catalog");
        let catalog = Arc::new(MemoryCatalog {
            fields: fields.to_vec(),
            ram: opts.ram,
            docs: Default::default(),
        });
        catalogs.insert(name.to_string(), catalog.clone());
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(catalog)
    }

    async fn open(&self, name: &str) -> Result<Arc<dyn Catalog>> {
        let catalogs = self.catalogs.lock();
        match catalogs.get(name) {
            Some(catalog) if !catalog.ram => Ok(catalog.clone()),
            _ => Err(Error::NotFound(format!("catalog {name}"))),
        }
    }
}

/// A catalog of [`MemoryCatalogStore`].
///
/// Ranks documents by the number of query terms found in their tokenized fields.
#[derive(Debug)]
pub struct MemoryCatalog {
    fields: Vec<FieldSchema>,
    ram: bool,
    docs: RwLock<Vec<Document>>,
}

impl MemoryCatalog {
    /// Number of documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Whether the catalog has no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn score(&self, doc: &Document, terms: &[String]) -> f32 {
        let mut score = 0.;
        for field in self.fields.iter().filter(|f| f.is_tokenized()) {
            let Some(Value::String(text)) = doc.get(&field.name) else {
                continue;
            };
            for token in tokenize(text) {
                if terms.contains(&token) {
                    score += 1.;
                }
            }
        }
        score
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn add_documents(&self, docs: Vec<Document>) -> Result<()> {
        self.docs.write().extend(docs);
        Ok(())
    }

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        let terms: Vec<String> = tokenize(query).collect();
        let docs = self.docs.read();
        let mut hits: Vec<Hit> = docs
            .iter()
            .filter_map(|doc| {
                let score = self.score(doc, &terms);
                (score > 0.).then(|| Hit {
                    score,
                    doc: doc.clone(),
                })
            })
            .collect();
        // stable: equal scores keep insertion order
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}
