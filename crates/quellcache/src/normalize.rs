//! Normalizer: flatten a response graph into store entries

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use ahash::RandomState;
use quellstore::{entry_key, NormalizedStore, Reference};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::IdentifierFields;
use crate::prototype::{FieldKind, ProtoField, Prototype};

/// What one normalization pass wrote
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizeReport {
    /// Entries written
    pub entries_written: usize,
    /// Root reference lists written
    pub lists_written: usize,
    /// Response paths of objects left out for lack of an identifier
    pub uncacheable: Vec<String>,
}

/// Fields and references gathered for one entry key
type PendingEntry = (Map<String, Value>, BTreeMap<String, Reference>);

/// Records gathered by one pass, written when the whole response is walked
///
/// An entity may show up several times in one response (an alias twice, a
/// capital that is also listed among the cities); every sighting adds to the
/// same pending entry.
#[derive(Default)]
struct Pass {
    /// Keys in first-completed order, so children precede parents
    order: Vec<String>,
    entries: HashMap<String, PendingEntry, RandomState>,
    lists: Vec<(String, Vec<String>)>,
    report: NormalizeReport,
}

impl Pass {
    fn collect(
        &mut self,
        key: String,
        fields: Map<String, Value>,
        references: BTreeMap<String, Reference>,
    ) {
        match self.entries.entry(key) {
            Entry::Occupied(mut pending) => {
                let (known_fields, known_references) = pending.get_mut();
                known_fields.extend(fields);
                known_references.extend(references);
            }
            Entry::Vacant(slot) => {
                self.order.push(slot.key().clone());
                slot.insert((fields, references));
            }
        }
    }

    fn flush(mut self, store: &NormalizedStore) -> quellstore::Result<NormalizeReport> {
        for key in &self.order {
            if let Some((fields, references)) = self.entries.remove(key) {
                store.write_entry(key, fields, references)?;
                self.report.entries_written += 1;
            }
        }
        for (list_key, keys) in self.lists {
            store.write_list(&list_key, keys)?;
            self.report.lists_written += 1;
        }
        Ok(self.report)
    }
}

/// Writes response data into a [`NormalizedStore`]
///
/// Field names and types come from the prototype the response answers, so
/// aliases and arguments map back to the same storage keys the planner reads.
pub struct Normalizer<'a> {
    store: &'a NormalizedStore,
    identifiers: &'a IdentifierFields,
}

impl<'a> Normalizer<'a> {
    /// Create a normalizer
    pub fn new(store: &'a NormalizedStore, identifiers: &'a IdentifierFields) -> Self {
        Self { store, identifiers }
    }

    /// Normalize `data`, a response to the query behind `prototype`
    ///
    /// Every entry key is written once, wholesale, with the union of what the
    /// response holds for it. Children are written before parents and lists
    /// last. Unmapped subtrees and root scalars are skipped.
    pub fn normalize(
        &self,
        data: &Map<String, Value>,
        prototype: &Prototype,
    ) -> quellstore::Result<NormalizeReport> {
        let mut pass = Pass::default();

        for field in &prototype.fields {
            let Some(value) = data.get(field.response_key()) else {
                continue;
            };
            let Some(type_name) = field.kind.type_name() else {
                continue;
            };
            let path = field.response_key();

            match value {
                Value::Array(items) => {
                    let keys = self.normalize_items(items, type_name, field, path, &mut pass);
                    if let (Some(keys), Some(list_key)) = (keys, field.list_key()) {
                        pass.lists.push((list_key, keys));
                    }
                }
                Value::Object(object) => {
                    self.normalize_object(object, type_name, field, path, &mut pass);
                }
                _ => {}
            }
        }

        let report = pass.flush(self.store)?;
        debug!(
            "Normalized {} entries, {} lists, {} uncacheable",
            report.entries_written,
            report.lists_written,
            report.uncacheable.len()
        );
        Ok(report)
    }

    /// Gather one object and everything below it
    ///
    /// Returns its key, or `None` when it has no identifier.
    fn normalize_object(
        &self,
        object: &Map<String, Value>,
        type_name: &str,
        field: &ProtoField,
        path: &str,
        pass: &mut Pass,
    ) -> Option<String> {
        let mut fields = Map::new();
        let mut references = BTreeMap::new();

        for child in field.children() {
            let Some(value) = object.get(child.response_key()) else {
                continue;
            };
            let storage_key = child.storage_key();

            if child.is_scalar() {
                fields.insert(storage_key, value.clone());
                continue;
            }
            let Some(child_type) = child.kind.type_name() else {
                continue;
            };

            let child_path = format!("{}.{}", path, child.response_key());
            let reference = match value {
                Value::Null => Some(Reference::Null),
                Value::Object(nested) => self
                    .normalize_object(nested, child_type, child, &child_path, pass)
                    .map(Reference::One),
                Value::Array(items) => self
                    .normalize_items(items, child_type, child, &child_path, pass)
                    .map(Reference::Many),
                _ => None,
            };
            if let Some(reference) = reference {
                references.insert(storage_key, reference);
            }
        }

        let pinned = match &field.kind {
            FieldKind::Entity { identifier, .. } => identifier.clone(),
            _ => None,
        };
        let Some(identifier) = self.identifier_of(object, field).or(pinned) else {
            warn!("Not caching {} at {}: no identifier", type_name, path);
            pass.report.uncacheable.push(path.to_string());
            return None;
        };

        let key = entry_key(type_name, &identifier);
        pass.collect(key.clone(), fields, references);
        Some(key)
    }

    /// Gather every item of a list
    ///
    /// Returns the item keys, or `None` when any item could not be stored.
    fn normalize_items(
        &self,
        items: &[Value],
        type_name: &str,
        field: &ProtoField,
        path: &str,
        pass: &mut Pass,
    ) -> Option<Vec<String>> {
        let mut keys = Vec::with_capacity(items.len());
        let mut complete = true;

        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}[{}]", path, i);
            match item {
                Value::Object(object) => {
                    match self.normalize_object(object, type_name, field, &item_path, pass) {
                        Some(key) => keys.push(key),
                        None => complete = false,
                    }
                }
                _ => complete = false,
            }
        }

        complete.then_some(keys)
    }

    fn identifier_of(&self, object: &Map<String, Value>, field: &ProtoField) -> Option<String> {
        field
            .children()
            .iter()
            .filter(|c| c.is_scalar() && self.identifiers.contains(&c.name))
            .find_map(|c| match object.get(c.response_key()) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
    }
}
