//! Normalized record format
//!
//! Two kinds of value live in the flat store:
//! ```text
//! Country--2 => {"fields":{"id":2,"name":"Bolivia"},"references":{"cities":["City--7"]},"expiresAt":1700000000000}
//! Country    => ["Country--1","Country--2"]
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Build the store key for one entity: `"<Type>--<identifier>"`
pub fn entry_key(type_name: &str, identifier: &str) -> String {
    format!("{}--{}", type_name, identifier)
}

/// A relation field stored in place of the nested value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reference {
    /// One-to-one relation
    One(String),
    /// One-to-many relation, in response order
    Many(Vec<String>),
    /// The relation was `null` in the response
    Null,
}

impl Reference {
    /// Entry keys this reference points at
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Reference::One(key) => vec![key.as_str()],
            Reference::Many(keys) => keys.iter().map(String::as_str).collect(),
            Reference::Null => Vec::new(),
        }
    }

    /// Check whether this reference points at `key`
    pub fn contains(&self, key: &str) -> bool {
        match self {
            Reference::One(k) => k == key,
            Reference::Many(keys) => keys.iter().any(|k| k == key),
            Reference::Null => false,
        }
    }

    /// This reference with `key` pruned; `None` when nothing sensible is left
    ///
    /// A one-to-one reference to the pruned key is dropped entirely so the
    /// field reads as a miss rather than as `null`.
    pub fn without(&self, key: &str) -> Option<Reference> {
        match self {
            Reference::One(k) if k == key => None,
            Reference::Many(keys) => Some(Reference::Many(
                keys.iter().filter(|k| *k != key).cloned().collect(),
            )),
            other => Some(other.clone()),
        }
    }
}

/// One normalized entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Scalar field values by storage name
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Relation fields by storage name
    #[serde(default)]
    pub references: BTreeMap<String, Reference>,

    /// Absolute expiry, unix milliseconds
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
}

impl CacheEntry {
    /// Create an entry expiring at `expires_at`
    pub fn new(
        fields: Map<String, Value>,
        references: BTreeMap<String, Reference>,
        expires_at: u64,
    ) -> Self {
        Self {
            fields,
            references,
            expires_at,
        }
    }

    /// An entry is absent from `expires_at` onwards
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Any value the normalized store writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    /// `"<Type>--<id>"` record
    Entry(CacheEntry),
    /// Ordered list of entry keys for a root collection
    List(Vec<String>),
}

impl StoredValue {
    /// Decode a raw store value
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Encode for the raw store
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
