use std::ops::Bound;

use serde_json::{Number, Value};

use crate::store::tables::{PostingKey, PostingKeyOwned};

const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;

/// Encode a field value into its order-preserving posting form.
///
/// Values of different kinds never interleave: booleans sort before numbers, numbers
/// before strings. Returns `None` for values that produce no posting (null, empty
/// strings, objects and arrays).
pub fn encode_value(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Bool(b) => Some(vec![TAG_BOOL, *b as u8]),
        Value::Number(n) => number_value(n),
        Value::String(s) if !s.is_empty() => Some(string_value(s)),
        _ => None,
    }
}

// The nearest f64 followed by the exact integer part. Rounding to f64 is monotonic, so
// the f64 orders all numbers and the integer part orders integers that round to the
// same f64. `-0.0` encodes like `0`.
fn number_value(n: &Number) -> Option<Vec<u8>> {
    let (float, exact) = match (n.as_i64(), n.as_u64()) {
        (Some(i), _) => (i as f64, i as i128),
        (None, Some(u)) => (u as f64, u as i128),
        (None, None) => {
            let f = n.as_f64()?;
            (f, f as i128)
        }
    };
    let float = if float == 0.0 { 0.0f64 } else { float };
    let bits = float.to_bits();
    let bits = if float.is_sign_negative() {
        !bits
    } else {
        bits ^ (1 << 63)
    };
    let exact = (exact as u128) ^ (1 << 127);
    let mut out = Vec::with_capacity(25);
    out.push(TAG_NUMBER);
    out.extend_from_slice(&bits.to_be_bytes());
    out.extend_from_slice(&exact.to_be_bytes());
    Some(out)
}

fn string_value(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    out.push(TAG_STRING);
    out.extend_from_slice(s.as_bytes());
    out
}

/// Bounds on the postings table.
///
/// Always constrained to a single `(index, field)` key space.
#[derive(Debug, Clone)]
pub struct PostingBounds((Bound<PostingKeyOwned>, Bound<PostingKeyOwned>));

impl PostingBounds {
    /// All postings of a field.
    pub fn field(index: &str, field: &str) -> Self {
        Self((field_start(index, field), field_end(index, field)))
    }

    /// Postings of a field with exactly this value.
    pub fn exact(index: &str, field: &str, value: &[u8]) -> Self {
        Self((
            Bound::Included(key(index, field, value, 0)),
            Bound::Included(key(index, field, value, u64::MAX)),
        ))
    }

    /// Postings of a field whose string value starts with `prefix`.
    pub fn prefix(index: &str, field: &str, prefix: &str) -> Self {
        let start = string_value(prefix);
        let mut end = start.clone();
        let end = if increment_by_one(&mut end) {
            Bound::Excluded(key(index, field, &end, 0))
        } else {
            field_end(index, field)
        };
        Self((Bound::Included(key(index, field, &start, 0)), end))
    }

    /// Values greater than `value`.
    pub fn gt(mut self, index: &str, field: &str, value: &[u8]) -> Self {
        self.0 .0 = Bound::Excluded(key(index, field, value, u64::MAX));
        self
    }

    /// Values greater than or equal to `value`.
    pub fn gte(mut self, index: &str, field: &str, value: &[u8]) -> Self {
        self.0 .0 = Bound::Included(key(index, field, value, 0));
        self
    }

    /// Values less than `value`.
    pub fn lt(mut self, index: &str, field: &str, value: &[u8]) -> Self {
        self.0 .1 = Bound::Excluded(key(index, field, value, 0));
        self
    }

    /// Values less than or equal to `value`.
    pub fn lte(mut self, index: &str, field: &str, value: &[u8]) -> Self {
        self.0 .1 = Bound::Included(key(index, field, value, u64::MAX));
        self
    }

    /// Whether no key can lie within these bounds.
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            (Bound::Included(start), Bound::Included(end)) => start > end,
            (Bound::Included(start), Bound::Excluded(end))
            | (Bound::Excluded(start), Bound::Included(end))
            | (Bound::Excluded(start), Bound::Excluded(end)) => start >= end,
            _ => false,
        }
    }

    pub fn as_ref(&self) -> (Bound<PostingKey>, Bound<PostingKey>) {
        (map_bound(&self.0 .0), map_bound(&self.0 .1))
    }
}

fn key(index: &str, field: &str, value: &[u8], lseq: u64) -> PostingKeyOwned {
    (index.to_string(), field.to_string(), value.to_vec(), lseq)
}

fn field_start(index: &str, field: &str) -> Bound<PostingKeyOwned> {
    Bound::Included(key(index, field, &[], 0))
}

// the smallest field name sorting after `field` and every value stored under it
fn field_end(index: &str, field: &str) -> Bound<PostingKeyOwned> {
    Bound::Excluded(key(index, &format!("{field}\0"), &[], 0))
}

fn map_bound(bound: &Bound<PostingKeyOwned>) -> Bound<PostingKey> {
    match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(k) => Bound::Included(posting_key_ref(k)),
        Bound::Excluded(k) => Bound::Excluded(posting_key_ref(k)),
    }
}

fn posting_key_ref(key: &PostingKeyOwned) -> PostingKey {
    (&key.0, &key.1, &key.2, key.3)
}

/// Increment a byte string by one, by incrementing the last byte that is not 255 by one.
///
/// Returns false if all bytes are 255.
pub fn increment_by_one(value: &mut [u8]) -> bool {
    for char in value.iter_mut().rev() {
        if *char != 255 {
            *char += 1;
            return true;
        } else {
            *char = 0;
        }
    }
    false
}
