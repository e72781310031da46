//! Engine configuration: options, type maps and client config files

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use quellstore::{FileStore, KvStore, MemoryStore, NormalizedStore};
use serde::{Deserialize, Serialize};

use crate::error::{QuellError, Result};

/// Default entry time-to-live
pub const DEFAULT_CACHE_TIME_SECONDS: u64 = 600;

/// Default directory for the local store
pub const DEFAULT_STORAGE_PATH: &str = ".quell-cache";

/// Field names treated as entity identifiers when none is configured
pub const DEFAULT_IDENTIFIER_FIELDS: [&str; 4] = ["id", "_id", "ID", "Id"];

/// Lifetime of the underlying key-value store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageScope {
    /// In memory, gone when the process ends
    #[default]
    Session,
    /// Persisted under `storagePath`
    Local,
}

/// Recognized engine options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    /// Entry time-to-live in seconds
    pub cache_time_seconds: u64,
    /// Store lifetime
    pub storage_scope: StorageScope,
    /// Directory of the local store
    pub storage_path: PathBuf,
    /// Overrides the argument/field name treated as the entity identifier
    pub identifier_field: Option<String>,
    /// Headers forwarded verbatim to the transport
    pub request_headers: BTreeMap<String, String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        let mut request_headers = BTreeMap::new();
        request_headers.insert("Content-Type".to_string(), "application/json".to_string());

        Self {
            cache_time_seconds: DEFAULT_CACHE_TIME_SECONDS,
            storage_scope: StorageScope::Session,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            identifier_field: None,
            request_headers,
        }
    }
}

impl CacheOptions {
    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_time_seconds)
    }

    /// Identifier names in effect
    pub fn identifier_fields(&self) -> IdentifierFields {
        match &self.identifier_field {
            Some(name) => IdentifierFields::new(vec![name.clone()]),
            None => IdentifierFields::default(),
        }
    }

    /// Open the backend selected by `storage_scope`
    pub fn open_store(&self) -> Result<NormalizedStore> {
        let backend: Arc<dyn KvStore> = match self.storage_scope {
            StorageScope::Session => Arc::new(MemoryStore::new()),
            StorageScope::Local => Arc::new(FileStore::open(&self.storage_path)?),
        };
        Ok(NormalizedStore::new(backend, self.ttl())?)
    }
}

/// Names that identify an entity, as arguments or selected fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierFields {
    names: Vec<String>,
}

impl IdentifierFields {
    /// Use exactly these names
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Check if `name` identifies an entity
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// The configured names, in priority order
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl Default for IdentifierFields {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTIFIER_FIELDS.iter().map(|s| s.to_string()).collect())
    }
}

/// Caller-supplied, read-only type information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeMaps {
    /// Query field name → graph type name
    pub field_to_type: HashMap<String, String, RandomState>,
    /// Graph type name → field under which its collection is requested
    pub type_to_collection_field: HashMap<String, String, RandomState>,
}

impl TypeMaps {
    /// Empty maps
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a query field to a graph type
    pub fn with_field(mut self, field: &str, type_name: &str) -> Self {
        self.field_to_type
            .insert(field.to_string(), type_name.to_string());
        self
    }

    /// Declare the collection field of a graph type
    pub fn with_collection(mut self, type_name: &str, field: &str) -> Self {
        self.type_to_collection_field
            .insert(type_name.to_string(), field.to_string());
        self
    }

    /// Graph type of a query field
    pub fn type_of(&self, field: &str) -> Option<&str> {
        self.field_to_type.get(field).map(String::as_str)
    }

    /// Check if `field` is the collection field of `type_name`
    pub fn is_collection_field(&self, type_name: &str, field: &str) -> bool {
        self.type_to_collection_field
            .get(type_name)
            .is_some_and(|f| f == field)
    }
}

/// Everything needed to stand up a client, as loaded from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Remote endpoint
    pub endpoint: String,
    /// Type maps
    #[serde(flatten)]
    pub maps: TypeMaps,
    /// Engine options
    #[serde(default)]
    pub options: CacheOptions,
}

impl ClientConfig {
    /// Parse a config from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| QuellError::Config(e.to_string()))
    }

    /// Load a config file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuellError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }
}
