//! Cache Read Planner: answer as much of a prototype as the store can

use quellstore::{entry_key, CacheEntry, NormalizedStore, Reference};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::prototype::{mark_all, FieldKind, ProtoField, Prototype};

/// Data recovered from the store for one prototype
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPlan {
    /// Cached response, shaped like the caller's query
    pub data: Map<String, Value>,
    /// True when every requested leaf was found
    pub complete: bool,
}

/// Walks a prototype against the store, marking each leaf satisfied or not
pub struct CacheReadPlanner<'a> {
    store: &'a NormalizedStore,
}

impl<'a> CacheReadPlanner<'a> {
    /// Create a planner over `store`
    pub fn new(store: &'a NormalizedStore) -> Self {
        Self { store }
    }

    /// Resolve `prototype` from the store
    ///
    /// Satisfiability flags are reset first, then set on every leaf. A list
    /// that cannot be answered in full is left out of `data` and all of its
    /// leaves are marked unsatisfied so it is fetched whole.
    pub fn plan(&self, prototype: &mut Prototype) -> quellstore::Result<ReadPlan> {
        prototype.reset_satisfaction();

        let mut data = Map::new();
        for field in &mut prototype.fields {
            if let Some(value) = self.resolve_root(field)? {
                data.insert(field.response_key().to_string(), value);
            }
        }

        let complete = prototype.is_satisfied();
        debug!(
            "Planned {} of {} root fields from cache (complete: {})",
            data.len(),
            prototype.fields.len(),
            complete
        );
        Ok(ReadPlan { data, complete })
    }

    fn resolve_root(&self, field: &mut ProtoField) -> quellstore::Result<Option<Value>> {
        let list_key = field.list_key();

        match &mut field.kind {
            FieldKind::Entity {
                type_name,
                identifier: Some(identifier),
                children,
            } => {
                let key = entry_key(type_name, identifier);
                match self.store.read_entry(&key)? {
                    Some(entry) => Ok(Some(self.resolve_entry(&entry, children)?)),
                    None => {
                        trace!("Miss on {}", key);
                        mark_all(children, false);
                        Ok(None)
                    }
                }
            }
            FieldKind::Collection { children, .. } => {
                let keys = match list_key {
                    Some(list_key) => self.store.read_list(&list_key)?,
                    None => None,
                };
                let Some(keys) = keys else {
                    mark_all(children, false);
                    return Ok(None);
                };
                self.resolve_many(&keys, children)
            }
            other => {
                other.mark(false);
                Ok(None)
            }
        }
    }

    fn resolve_entry(
        &self,
        entry: &CacheEntry,
        children: &mut [ProtoField],
    ) -> quellstore::Result<Value> {
        let mut object = Map::new();

        for child in children.iter_mut() {
            let storage_key = child.storage_key();
            let response_key = child.response_key().to_string();

            if child.is_scalar() {
                let value = entry.fields.get(&storage_key);
                if let Some(value) = value {
                    object.insert(response_key, value.clone());
                }
                child.kind.mark(value.is_some());
                continue;
            }

            match entry.references.get(&storage_key) {
                Some(reference) => {
                    if let Some(value) =
                        self.resolve_reference(reference, child.kind.children_mut())?
                    {
                        object.insert(response_key, value);
                    }
                }
                None => child.kind.mark(false),
            }
        }

        Ok(Value::Object(object))
    }

    fn resolve_reference(
        &self,
        reference: &Reference,
        children: &mut [ProtoField],
    ) -> quellstore::Result<Option<Value>> {
        match reference {
            Reference::Null => {
                mark_all(children, true);
                Ok(Some(Value::Null))
            }
            Reference::One(key) => match self.store.read_entry(key)? {
                Some(entry) => Ok(Some(self.resolve_entry(&entry, children)?)),
                None => {
                    trace!("Dangling reference {}", key);
                    mark_all(children, false);
                    Ok(None)
                }
            },
            Reference::Many(keys) => self.resolve_many(keys, children),
        }
    }

    fn resolve_many(
        &self,
        keys: &[String],
        children: &mut [ProtoField],
    ) -> quellstore::Result<Option<Value>> {
        if keys.is_empty() {
            mark_all(children, true);
            return Ok(Some(Value::Array(Vec::new())));
        }

        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            match self.store.read_entry(key)? {
                Some(entry) => items.push(self.resolve_entry(&entry, children)?),
                None => {
                    trace!("Dangling list item {}", key);
                    mark_all(children, false);
                    return Ok(None);
                }
            }
        }

        if !children.iter().all(ProtoField::is_satisfied) {
            mark_all(children, false);
            return Ok(None);
        }
        Ok(Some(Value::Array(items)))
    }
}
