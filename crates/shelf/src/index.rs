use std::collections::BTreeSet;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One component of an index key. Numbers sort before strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    Int(i64),
    Str(String),
}

impl From<i64> for IndexValue {
    fn from(v: i64) -> Self {
        IndexValue::Int(v)
    }
}

impl From<&str> for IndexValue {
    fn from(v: &str) -> Self {
        IndexValue::Str(v.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(v: String) -> Self {
        IndexValue::Str(v)
    }
}

/// Index keys compare lexicographically, component by component.
pub type IndexKey = Vec<IndexValue>;

/// Inclusive key ranges over an index.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyRange {
    All,
    Only(IndexKey),
    Bound(IndexKey, IndexKey),
    LowerBound(IndexKey),
    UpperBound(IndexKey),
}

impl KeyRange {
    pub fn only(key: impl IntoIterator<Item = IndexValue>) -> Self {
        KeyRange::Only(key.into_iter().collect())
    }

    pub fn at_least(value: impl Into<IndexValue>) -> Self {
        KeyRange::LowerBound(vec![value.into()])
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Only(k) => key == k,
            KeyRange::Bound(lo, hi) => key >= lo && key <= hi,
            KeyRange::LowerBound(lo) => key >= lo,
            KeyRange::UpperBound(hi) => key <= hi,
        }
    }

    fn lower(&self) -> Option<&IndexKey> {
        match self {
            KeyRange::Only(k) | KeyRange::Bound(k, _) | KeyRange::LowerBound(k) => Some(k),
            KeyRange::All | KeyRange::UpperBound(_) => None,
        }
    }

    fn past_upper(&self, key: &IndexKey) -> bool {
        match self {
            KeyRange::Only(hi) | KeyRange::Bound(_, hi) | KeyRange::UpperBound(hi) => key > hi,
            KeyRange::All | KeyRange::LowerBound(_) => false,
        }
    }
}

/// Build the key for `key_path` out of a serialized row. Rows missing any
/// component (or holding a non-integer, non-string value) are not indexed.
pub(crate) fn extract_key(row: &Value, key_path: &[String]) -> Option<IndexKey> {
    key_path
        .iter()
        .map(|field| match row.get(field)? {
            Value::Number(n) => n.as_i64().map(IndexValue::Int),
            Value::String(s) => Some(IndexValue::Str(s.clone())),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub(crate) struct Index {
    pub name: String,
    pub key_path: Vec<String>,
    entries: BTreeSet<(IndexKey, String)>,
}

impl Index {
    pub fn new(name: &str, key_path: &[String]) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_vec(),
            entries: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, key: IndexKey, primary: &str) {
        self.entries.insert((key, primary.to_string()));
    }

    pub fn remove(&mut self, key: IndexKey, primary: &str) {
        self.entries.remove(&(key, primary.to_string()));
    }

    /// Primary keys within `range`, highest index key first.
    pub fn scan(&self, range: &KeyRange) -> Vec<String> {
        let start = match range.lower() {
            Some(lo) => Bound::Included((lo.clone(), String::new())),
            None => Bound::Unbounded,
        };
        let mut hits: Vec<String> = self
            .entries
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| !range.past_upper(key))
            .filter(|(key, _)| range.contains(key))
            .map(|(_, primary)| primary.clone())
            .collect();
        hits.reverse();
        hits
    }
}
