use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bounds::PostingBounds;
use crate::{
    error::Result,
    store::{
        ranges::TableRange,
        tables::{PostingKey, POSTINGS_TABLE},
        Store,
    },
};

/// Options of a range query against an [`IndexView`](super::IndexView).
///
/// `field` is required. It is either a field address (`<type>#<field>`) or, when
/// `type` is set, a field name of that type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexQuery {
    /// Field to scan.
    pub field: Option<String>,
    /// Type to resolve `field` against.
    #[serde(rename = "type")]
    pub ty: Option<String>,
    /// Only postings with exactly this value.
    pub value: Option<Value>,
    /// Only postings whose string value starts with this prefix.
    pub prefix: Option<String>,
    /// Lower bound, exclusive.
    pub gt: Option<Value>,
    /// Lower bound, inclusive.
    pub gte: Option<Value>,
    /// Upper bound, exclusive.
    pub lt: Option<Value>,
    /// Upper bound, inclusive. Takes precedence over `lt`.
    pub lte: Option<Value>,
    /// Scan in descending order.
    pub reverse: bool,
    /// Maximum number of results.
    pub limit: Option<u64>,
    /// Number of results to skip.
    pub offset: u64,
}

impl IndexQuery {
    /// Query all postings of `field`.
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            ..Default::default()
        }
    }

    /// Resolve `field` against this type.
    pub fn of_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = Some(ty.into());
        self
    }

    /// Match an exact value.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Match a string prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set an exclusive lower bound.
    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    /// Set an inclusive lower bound.
    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    /// Set an exclusive upper bound.
    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    /// Set an inclusive upper bound.
    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    /// Scan in descending order.
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip results.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// A posting as returned by queries: only its logical sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PostingRef {
    /// Logical sequence number of the indexed version.
    pub lseq: u64,
}

/// A lazy iterator over the results of an [`IndexQuery`].
#[derive(Debug)]
pub struct PostingIter {
    range: Option<TableRange<PostingKey<'static>, ()>>,
    offset: u64,
    limit: Option<u64>,
    count: u64,
}

impl PostingIter {
    pub(super) fn new(store: &Store, bounds: PostingBounds, query: &IndexQuery) -> Result<Self> {
        let range = match bounds.is_empty() {
            true => None,
            false => {
                let range = TableRange::new(
                    store.db(),
                    |tx| tx.open_table(POSTINGS_TABLE),
                    move |table| table.range(bounds.as_ref()),
                )?;
                Some(range.reversed(query.reverse))
            }
        };
        Ok(Self {
            range,
            offset: query.offset,
            // the scan reads offset + limit rows, the first offset rows are skipped here
            limit: query.limit.map(|limit| limit.saturating_add(query.offset)),
            count: 0,
        })
    }
}

impl Iterator for PostingIter {
    type Item = Result<PostingRef>;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.range.as_mut()?;
        loop {
            if let Some(limit) = self.limit {
                if self.count >= limit {
                    return None;
                }
            }
            let next = range.next_mapped(|(_index, _field, _value, lseq), ()| PostingRef { lseq });
            match next {
                None => return None,
                Some(Err(err)) => return Some(Err(err)),
                Some(Ok(posting)) => {
                    self.count += 1;
                    if self.count > self.offset {
                        return Some(Ok(posting));
                    }
                }
            }
        }
    }
}
