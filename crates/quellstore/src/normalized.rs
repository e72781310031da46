//! NormalizedStore: typed records and expiry over a raw [`KvStore`]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::expiry::ExpiryIndex;
use crate::record::{CacheEntry, Reference, StoredValue};
use crate::storage::KvStore;

/// Entry/list view of the flat store with time-based expiry
///
/// Expired records are treated as absent on read even when the backend still
/// holds them. Reads never touch the backend; records are physically removed
/// only by [`NormalizedStore::sweep`] or an explicit removal.
pub struct NormalizedStore {
    /// Raw key-value backend
    backend: Arc<dyn KvStore>,

    /// Deadlines of every record written through this handle
    expiry: Mutex<ExpiryIndex>,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Entry time-to-live in milliseconds
    ttl_millis: u64,
}

impl NormalizedStore {
    /// Wrap `backend` with the wall clock
    pub fn new(backend: Arc<dyn KvStore>, ttl: Duration) -> Result<Self> {
        Self::with_clock(backend, ttl, Arc::new(SystemClock))
    }

    /// Wrap `backend` with a custom clock
    ///
    /// Records already present in the backend (a persisted store) are indexed
    /// so they keep expiring on schedule. Lists carry no deadline of their
    /// own; a replayed list expires with the first of its entries, or at once
    /// when it is empty or names an entry that is gone.
    pub fn with_clock(backend: Arc<dyn KvStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        let ttl_millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let now = clock.now_millis();
        let mut expiry = ExpiryIndex::new();
        let mut lists = Vec::new();

        for key in backend.keys()? {
            let Some(raw) = backend.get(&key)? else {
                continue;
            };
            match StoredValue::decode(&raw) {
                Ok(StoredValue::Entry(entry)) => expiry.schedule(&key, entry.expires_at),
                Ok(StoredValue::List(keys)) => lists.push((key, keys)),
                Err(_) => {}
            }
        }

        for (key, members) in lists {
            let deadline = members
                .iter()
                .map(|member| expiry.deadline(member))
                .collect::<Option<Vec<u64>>>()
                .and_then(|deadlines| deadlines.into_iter().min())
                .unwrap_or(now);
            expiry.schedule(&key, deadline);
        }

        Ok(Self {
            backend,
            expiry: Mutex::new(expiry),
            clock,
            ttl_millis,
        })
    }

    /// Entry time-to-live
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }

    /// Current time according to the store's clock
    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Deadline of a record written now; saturates for very long TTLs
    fn deadline(&self) -> u64 {
        self.now().saturating_add(self.ttl_millis)
    }

    /// The raw backend
    pub fn backend(&self) -> &Arc<dyn KvStore> {
        &self.backend
    }

    /// Read a live entry
    ///
    /// Returns `None` for missing, expired, undecodable or list records.
    pub fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        match self.read_record(key)? {
            Some(StoredValue::Entry(entry)) => {
                if entry.is_expired(self.now()) {
                    debug!("Entry {} expired", key);
                    Ok(None)
                } else {
                    Ok(Some(entry))
                }
            }
            _ => Ok(None),
        }
    }

    /// Read a live reference list
    pub fn read_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        if self.expiry.lock().is_expired(key, self.now()) {
            debug!("List {} expired", key);
            return Ok(None);
        }

        match self.read_record(key)? {
            Some(StoredValue::List(keys)) => Ok(Some(keys)),
            _ => Ok(None),
        }
    }

    fn read_record(&self, key: &str) -> Result<Option<StoredValue>> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };

        match StoredValue::decode(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Undecodable record {}, due for the next sweep: {}", key, e);
                self.expiry.lock().schedule(key, self.now());
                Ok(None)
            }
        }
    }

    /// Write an entry wholesale, replacing any previous fields and references
    ///
    /// # Returns
    /// * `Result<CacheEntry>` - The stored entry with its expiry
    pub fn write_entry(
        &self,
        key: &str,
        fields: Map<String, Value>,
        references: BTreeMap<String, Reference>,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry::new(fields, references, self.deadline());
        self.put(key, &StoredValue::Entry(entry.clone()), entry.expires_at)?;
        Ok(entry)
    }

    /// Write the ordered reference list for a root collection
    pub fn write_list(&self, key: &str, keys: Vec<String>) -> Result<()> {
        self.put(key, &StoredValue::List(keys), self.deadline())
    }

    fn put(&self, key: &str, value: &StoredValue, expires_at: u64) -> Result<()> {
        self.backend.set(key, value.encode()?)?;
        self.expiry.lock().schedule(key, expires_at);
        Ok(())
    }

    /// Overwrite some scalar fields of a live entry in place
    ///
    /// References and `expiresAt` are untouched.
    ///
    /// # Returns
    /// * `Result<bool>` - `false` when there was no live entry to patch
    pub fn patch_fields(&self, key: &str, patch: Map<String, Value>) -> Result<bool> {
        let Some(mut entry) = self.read_entry(key)? else {
            return Ok(false);
        };

        for (name, value) in patch {
            entry.fields.insert(name, value);
        }
        self.backend.set(key, StoredValue::Entry(entry).encode()?)?;

        Ok(true)
    }

    /// Remove a record
    pub fn remove(&self, key: &str) -> Result<bool> {
        self.expiry.lock().cancel(key);
        self.backend.delete(key)
    }

    /// Remove `key` from every reference and reference list in the store
    ///
    /// # Returns
    /// * `Result<usize>` - Number of records rewritten
    pub fn prune_references(&self, key: &str) -> Result<usize> {
        let mut rewritten = 0;

        for record_key in self.backend.keys()? {
            let Some(raw) = self.backend.get(&record_key)? else {
                continue;
            };
            let Ok(record) = StoredValue::decode(&raw) else {
                continue;
            };

            let pruned = match record {
                StoredValue::Entry(mut entry) => {
                    if !entry.references.values().any(|r| r.contains(key)) {
                        continue;
                    }
                    entry.references = entry
                        .references
                        .into_iter()
                        .filter_map(|(field, reference)| {
                            reference.without(key).map(|reference| (field, reference))
                        })
                        .collect();
                    StoredValue::Entry(entry)
                }
                StoredValue::List(keys) => {
                    if !keys.iter().any(|k| k == key) {
                        continue;
                    }
                    StoredValue::List(keys.into_iter().filter(|k| k != key).collect())
                }
            };

            self.backend.set(&record_key, pruned.encode()?)?;
            rewritten += 1;
        }

        debug!("Pruned {} from {} records", key, rewritten);
        Ok(rewritten)
    }

    /// Physically remove every record whose deadline has passed
    ///
    /// # Returns
    /// * `Result<usize>` - Number of records removed
    pub fn sweep(&self) -> Result<usize> {
        let expired = self.expiry.lock().pop_expired(self.now());

        let mut removed = 0;
        for key in expired {
            if self.backend.delete(&key)? {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Swept {} expired records", removed);
        }
        Ok(removed)
    }

    /// Number of raw records, expired or not
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    /// Check if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Remove every record
    pub fn clear(&self) -> Result<()> {
        self.expiry.lock().clear();
        self.backend.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::entry_key;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn store_with_clock() -> (NormalizedStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = NormalizedStore::with_clock(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(600),
            clock.clone(),
        )
        .unwrap();
        (store, clock)
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_write_and_read_entry() {
        let (store, _) = store_with_clock();

        let written = store
            .write_entry("Country--2", fields(json!({"id": 2, "name": "Bolivia"})), BTreeMap::new())
            .unwrap();
        assert_eq!(written.expires_at, 601_000);

        let entry = store.read_entry("Country--2").unwrap().unwrap();
        assert_eq!(entry.fields["name"], json!("Bolivia"));
        assert!(store.read_list("Country--2").unwrap().is_none());
    }

    #[test]
    fn test_expired_entry_reads_absent() {
        let (store, clock) = store_with_clock();
        store
            .write_entry("Country--2", fields(json!({"id": 2})), BTreeMap::new())
            .unwrap();

        clock.advance_secs(600);

        // Reads report the miss; only the sweep evicts
        assert_eq!(store.len(), 1);
        assert!(store.read_entry("Country--2").unwrap().is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.sweep().unwrap(), 1);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_expiry_consults_record_not_index() {
        let clock = Arc::new(ManualClock::new(5_000));
        let backend: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        backend
            .set(
                "Country--1",
                r#"{"fields":{"id":1},"references":{},"expiresAt":4000}"#.to_string(),
            )
            .unwrap();
        let store =
            NormalizedStore::with_clock(backend, Duration::from_secs(600), clock).unwrap();

        assert!(store.read_entry("Country--1").unwrap().is_none());
    }

    #[test]
    fn test_list_expiry() {
        let (store, clock) = store_with_clock();
        store
            .write_list("Country", vec![entry_key("Country", "1")])
            .unwrap();
        assert_eq!(
            store.read_list("Country").unwrap(),
            Some(vec!["Country--1".to_string()])
        );

        clock.advance_secs(601);
        assert!(store.read_list("Country").unwrap().is_none());
    }

    #[test]
    fn test_sweep_removes_only_due_records() {
        let (store, clock) = store_with_clock();
        store.write_entry("A--1", Map::new(), BTreeMap::new()).unwrap();
        clock.advance_secs(300);
        store.write_entry("A--2", Map::new(), BTreeMap::new()).unwrap();

        clock.advance_secs(300);
        assert_eq!(store.sweep().unwrap(), 1);
        assert!(store.backend().get("A--1").unwrap().is_none());
        assert!(store.read_entry("A--2").unwrap().is_some());
    }

    #[test]
    fn test_rewrite_extends_deadline() {
        let (store, clock) = store_with_clock();
        store.write_entry("A--1", Map::new(), BTreeMap::new()).unwrap();
        clock.advance_secs(500);
        store.write_entry("A--1", Map::new(), BTreeMap::new()).unwrap();
        clock.advance_secs(200);

        assert_eq!(store.sweep().unwrap(), 0);
        assert!(store.read_entry("A--1").unwrap().is_some());
    }

    #[test]
    fn test_patch_fields_keeps_references() {
        let (store, _) = store_with_clock();
        let mut references = BTreeMap::new();
        references.insert("cities".to_string(), Reference::Many(vec!["City--1".to_string()]));
        store
            .write_entry(
                "Country--1",
                fields(json!({"id": 1, "name": "Andorra", "population": 77000})),
                references.clone(),
            )
            .unwrap();

        assert!(store
            .patch_fields("Country--1", fields(json!({"name": "Andorra la Vella"})))
            .unwrap());
        assert!(!store.patch_fields("Country--9", Map::new()).unwrap());

        let entry = store.read_entry("Country--1").unwrap().unwrap();
        assert_eq!(entry.fields["name"], json!("Andorra la Vella"));
        assert_eq!(entry.fields["population"], json!(77000));
        assert_eq!(entry.references, references);
        assert_eq!(entry.expires_at, 601_000);
    }

    #[test]
    fn test_prune_references() {
        let (store, _) = store_with_clock();
        let mut references = BTreeMap::new();
        references.insert(
            "cities".to_string(),
            Reference::Many(vec!["City--1".to_string(), "City--2".to_string()]),
        );
        references.insert("capital".to_string(), Reference::One("City--1".to_string()));
        store.write_entry("Country--1", Map::new(), references).unwrap();
        store
            .write_list("City", vec!["City--1".to_string(), "City--2".to_string()])
            .unwrap();
        store.write_entry("Country--2", Map::new(), BTreeMap::new()).unwrap();

        assert_eq!(store.prune_references("City--1").unwrap(), 2);

        let entry = store.read_entry("Country--1").unwrap().unwrap();
        assert_eq!(
            entry.references.get("cities"),
            Some(&Reference::Many(vec!["City--2".to_string()]))
        );
        assert!(!entry.references.contains_key("capital"));
        assert_eq!(
            store.read_list("City").unwrap(),
            Some(vec!["City--2".to_string()])
        );
    }

    #[test]
    fn test_undecodable_record_is_swept() {
        let (store, _) = store_with_clock();
        store.backend().set("Country--1", "{broken".to_string()).unwrap();

        assert!(store.read_entry("Country--1").unwrap().is_none());
        assert!(store.backend().get("Country--1").unwrap().is_some());

        assert_eq!(store.sweep().unwrap(), 1);
        assert!(store.backend().get("Country--1").unwrap().is_none());
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = NormalizedStore::with_clock(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(u64::MAX / 1000),
            clock.clone(),
        )
        .unwrap();

        let written = store
            .write_entry("Country--1", fields(json!({"id": 1})), BTreeMap::new())
            .unwrap();
        assert_eq!(written.expires_at, u64::MAX);
        store.write_list("Country", vec!["Country--1".to_string()]).unwrap();

        clock.advance_secs(10 * 365 * 24 * 3600);
        assert_eq!(store.sweep().unwrap(), 0);
        assert!(store.read_entry("Country--1").unwrap().is_some());
        assert!(store.read_list("Country").unwrap().is_some());

        let store = NormalizedStore::new(Arc::new(MemoryStore::new()), Duration::MAX).unwrap();
        assert_eq!(store.ttl(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_replayed_list_expires_with_its_entries() {
        let clock = Arc::new(ManualClock::new(5_000));
        let backend: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        backend
            .set(
                "Country--1",
                r#"{"fields":{"id":1},"references":{},"expiresAt":8000}"#.to_string(),
            )
            .unwrap();
        backend
            .set(
                "Country--2",
                r#"{"fields":{"id":2},"references":{},"expiresAt":9000}"#.to_string(),
            )
            .unwrap();
        backend
            .set("Country", r#"["Country--1","Country--2"]"#.to_string())
            .unwrap();
        backend
            .set("citiesByCountry(country_id:1)", r#"["City--4"]"#.to_string())
            .unwrap();

        let store = NormalizedStore::with_clock(backend, Duration::from_secs(600), clock.clone())
            .unwrap();

        // Names an entry the store no longer holds
        assert!(store.read_list("citiesByCountry(country_id:1)").unwrap().is_none());

        assert!(store.read_list("Country").unwrap().is_some());
        clock.advance_secs(3);
        assert!(store.read_list("Country").unwrap().is_none());
        assert!(store.read_entry("Country--2").unwrap().is_some());
    }

    #[test]
    fn test_clear() {
        let (store, _) = store_with_clock();
        store.write_entry("A--1", Map::new(), BTreeMap::new()).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.sweep().unwrap(), 0);
    }
}
