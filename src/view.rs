//! Secondary index views.
//!
//! An [`IndexView`] derives postings from resolved versions: for each field marked
//! `index.basic` in the schema it stores one `(field address, value, lseq)` key per
//! non-empty value. Postings are immutable once written and can be scanned by value
//! range with an [`IndexQuery`].

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    schema::Schema,
    store::{tables::PostingKeyOwned, Store, StoreUpdate},
    version::Version,
};

mod bounds;
mod query;

pub use self::{
    bounds::encode_value,
    query::{IndexQuery, PostingIter, PostingRef},
};
use self::bounds::PostingBounds;

/// A version together with the logical sequence number it was applied at.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    /// Logical sequence number.
    pub lseq: u64,
    /// The version.
    pub version: Version,
}

/// One entry of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posting {
    /// Field address, `<type>#<field>`.
    pub field: String,
    /// Encoded field value, see [`encode_value`].
    pub value: Vec<u8>,
    /// Logical sequence number of the indexed version.
    pub lseq: u64,
}

/// A named secondary index over the fields of a schema.
#[derive(Debug, Clone)]
pub struct IndexView {
    name: String,
    store: Store,
    schema: Arc<RwLock<Schema>>,
}

impl IndexView {
    /// Create a view named `name`.
    pub fn new(name: impl Into<String>, store: Store, schema: Arc<RwLock<Schema>>) -> Self {
        Self {
            name: name.into(),
            store,
            schema,
        }
    }

    /// Name of the index.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Derive the postings of a batch of records.
    ///
    /// Records whose type is unknown or which have no basic-indexed fields yield no
    /// postings. Array values yield one posting per element.
    pub fn map_batch(&self, records: &[ResolvedRecord]) -> Vec<Posting> {
        let schema = self.schema.read();
        let mut postings = Vec::new();
        for record in records {
            let version = &record.version;
            if version.deleted {
                continue;
            }
            let Some(ty) = version.ty.as_deref() else {
                continue;
            };
            for field in schema.basic_fields(ty) {
                let Some(value) = version.field(field.name) else {
                    continue;
                };
                let values = match value {
                    Value::Array(values) => values.iter().collect(),
                    value => vec![value],
                };
                for value in values {
                    if let Some(value) = encode_value(value) {
                        postings.push(Posting {
                            field: field.address(),
                            value,
                            lseq: record.lseq,
                        });
                    }
                }
            }
        }
        trace!(index = %self.name, records = records.len(), postings = postings.len(), "map batch");
        postings
    }

    /// Convert postings to keys of the postings table.
    pub fn posting_keys(&self, postings: &[Posting]) -> Vec<PostingKeyOwned> {
        postings
            .iter()
            .map(|p| (self.name.clone(), p.field.clone(), p.value.clone(), p.lseq))
            .collect()
    }

    /// Store postings.
    pub fn put(&self, postings: &[Posting]) -> Result<()> {
        self.store.commit(&StoreUpdate {
            postings: self.posting_keys(postings),
            ..Default::default()
        })
    }

    /// Scan postings.
    ///
    /// Fails with [`Error::MissingField`] if the query names no field and with
    /// [`Error::UnknownField`] if the field is not part of the schema.
    pub fn query(&self, query: &IndexQuery) -> Result<PostingIter> {
        let field = query.field.as_deref().ok_or(Error::MissingField)?;
        let field = {
            let schema = self.schema.read();
            schema.resolve_field_of(query.ty.as_deref(), field)?.address()
        };
        let bounds = self.bounds(&field, query)?;
        debug!(index = %self.name, %field, ?bounds, "query");
        PostingIter::new(&self.store, bounds, query)
    }

    fn bounds(&self, field: &str, query: &IndexQuery) -> Result<PostingBounds> {
        let index = self.name.as_str();
        let encode = |option: &str, value: &Value| {
            encode_value(value)
                .ok_or_else(|| Error::InvalidQuery(format!("`{option}` cannot be {value}")))
        };
        let mut bounds = match (&query.value, &query.prefix) {
            (Some(value), _) => PostingBounds::exact(index, field, &encode("value", value)?),
            (None, Some(prefix)) => PostingBounds::prefix(index, field, prefix),
            (None, None) => PostingBounds::field(index, field),
        };
        if let Some(value) = &query.gt {
            bounds = bounds.gt(index, field, &encode("gt", value)?);
        }
        if let Some(value) = &query.gte {
            bounds = bounds.gte(index, field, &encode("gte", value)?);
        }
        if let Some(value) = &query.lt {
            bounds = bounds.lt(index, field, &encode("lt", value)?);
        }
        if let Some(value) = &query.lte {
            bounds = bounds.lte(index, field, &encode("lte", value)?);
        }
        Ok(bounds)
    }

    /// Drop all postings of this index.
    pub fn reset(&self) -> Result<usize> {
        let removed = self.store.clear_postings(&self.name)?;
        debug!(index = %self.name, removed, "reset");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use testresult::TestResult;

    use super::*;
    use crate::{
        keys::{Address, WriterKey},
        schema::{FieldKind, FieldSpec, TypeSpec},
    };

    fn view() -> Result<IndexView> {
        let mut schema = Schema::new("test");
        schema.add_type(
            TypeSpec::new("doc")
                .field("n", FieldSpec::new(FieldKind::Number).basic())
                .field("tags", FieldSpec::new(FieldKind::Array).basic())
                .field("name", FieldSpec::new(FieldKind::String).basic())
                .field("body", FieldSpec::new(FieldKind::String)),
        );
        let store = Store::in_memory()?;
        Ok(IndexView::new("basic", store, Arc::new(RwLock::new(schema))))
    }

    fn record(lseq: u64, value: Value) -> ResolvedRecord {
        ResolvedRecord {
            lseq,
            version: Version {
                address: Address::new(WriterKey::from_bytes([1u8; 32]), lseq),
                id: Some(format!("r{lseq}")),
                ty: Some("test/doc".to_string()),
                value,
                deleted: false,
                links: vec![],
                timestamp: None,
            },
        }
    }

    fn lseqs(iter: PostingIter) -> Result<Vec<u64>> {
        iter.map(|p| p.map(|p| p.lseq)).collect()
    }

    fn populate(view: &IndexView, n: u64) -> Result<()> {
        let records: Vec<_> = (0..n).map(|i| record(i, json!({ "n": i + 1 }))).collect();
        view.put(&view.map_batch(&records))
    }

    #[test]
    fn map_batch_skips_empty_and_unindexed() {
        let view = view().unwrap();
        let records = vec![
            record(0, json!({ "n": 1, "name": "", "body": "text", "tags": ["a", "b", null] })),
            record(1, json!({ "other": true })),
        ];
        let postings = view.map_batch(&records);
        let fields: Vec<_> = postings.iter().map(|p| p.field.as_str()).collect();
        assert_eq!(fields, vec!["test/doc#n", "test/doc#tags", "test/doc#tags"]);
    }

    #[test]
    fn range_query_gte() -> TestResult {
        let view = view()?;
        populate(&view, 3)?;
        let query = IndexQuery::field("n").of_type("doc").gte(2);
        assert_eq!(lseqs(view.query(&query)?)?, vec![1, 2]);
        let query = query.reverse(true);
        assert_eq!(lseqs(view.query(&query)?)?, vec![2, 1]);
        Ok(())
    }

    #[test]
    fn range_bounds() -> TestResult {
        let view = view()?;
        populate(&view, 5)?;
        let q = || IndexQuery::field("test/doc#n");
        assert_eq!(lseqs(view.query(&q().value(3))?)?, vec![2]);
        assert_eq!(lseqs(view.query(&q().gt(3))?)?, vec![3, 4]);
        assert_eq!(lseqs(view.query(&q().lt(3))?)?, vec![0, 1]);
        assert_eq!(lseqs(view.query(&q().gt(1).lte(3))?)?, vec![1, 2]);
        // lte replaces an earlier upper bound
        assert_eq!(lseqs(view.query(&q().lt(2).lte(4))?)?, vec![0, 1, 2, 3]);
        assert_eq!(lseqs(view.query(&q().gt(4).lt(2))?)?, Vec::<u64>::new());
        assert_eq!(lseqs(view.query(&q().value(42))?)?, Vec::<u64>::new());
        Ok(())
    }

    #[test]
    fn offset_widens_limit() -> TestResult {
        let view = view()?;
        populate(&view, 10)?;
        let query = IndexQuery::field("test/doc#n").limit(2).offset(3);
        assert_eq!(lseqs(view.query(&query)?)?, vec![3, 4]);
        let query = IndexQuery::field("test/doc#n").offset(8);
        assert_eq!(lseqs(view.query(&query)?)?, vec![8, 9]);
        Ok(())
    }

    #[test]
    fn prefix_and_arrays() -> TestResult {
        let view = view()?;
        let records = vec![
            record(0, json!({ "name": "apple", "tags": ["x", "y"] })),
            record(1, json!({ "name": "apricot", "tags": ["y"] })),
            record(2, json!({ "name": "banana" })),
        ];
        view.put(&view.map_batch(&records))?;
        let query = IndexQuery::field("name").of_type("doc").prefix("ap");
        assert_eq!(lseqs(view.query(&query)?)?, vec![0, 1]);
        let query = IndexQuery::field("tags").of_type("doc").value("y");
        assert_eq!(lseqs(view.query(&query)?)?, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn query_errors() -> TestResult {
        let view = view()?;
        let err = view.query(&IndexQuery::default()).unwrap_err();
        assert!(matches!(err, Error::MissingField));
        let err = view.query(&IndexQuery::field("nope").of_type("doc")).unwrap_err();
        assert!(matches!(err, Error::UnknownField(_)));

        // values that are never indexed cannot be bounds
        let q = || IndexQuery::field("test/doc#n");
        for query in [
            q().value(Value::Null),
            q().value(""),
            q().gt(json!({ "a": 1 })),
            q().gte(json!([1, 2])),
            q().lt(Value::Null),
            q().lte(""),
        ] {
            let err = view.query(&query).unwrap_err();
            assert!(matches!(err, Error::InvalidQuery(_)), "{query:?}: {err:?}");
        }
        Ok(())
    }

    #[test]
    fn large_integers_are_distinct() -> TestResult {
        let view = view()?;
        let big = 1u64 << 53;
        let records = vec![
            record(0, json!({ "n": big })),
            record(1, json!({ "n": big + 1 })),
            record(2, json!({ "n": u64::MAX })),
        ];
        view.put(&view.map_batch(&records))?;
        let q = || IndexQuery::field("test/doc#n");
        assert_eq!(lseqs(view.query(&q().value(big + 1))?)?, vec![1]);
        assert_eq!(lseqs(view.query(&q().value(big))?)?, vec![0]);
        assert_eq!(lseqs(view.query(&q().gt(big))?)?, vec![1, 2]);
        assert_eq!(lseqs(view.query(&q().lt(u64::MAX))?)?, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn reset_drops_postings() -> TestResult {
        let view = view()?;
        populate(&view, 4)?;
        assert_eq!(view.reset()?, 4);
        assert!(lseqs(view.query(&IndexQuery::field("test/doc#n"))?)?.is_empty());
        Ok(())
    }
}
