//! Mutation Handler: keep the store consistent with server-side writes

use quellstore::{entry_key, NormalizedStore};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{IdentifierFields, TypeMaps};
use crate::normalize::Normalizer;
use crate::prototype::Prototype;

/// Name fragments that mark a creating mutation
const CREATE_VERBS: [&str; 4] = ["add", "new", "create", "make"];

/// What a mutation does to the entity it names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationIntent {
    /// Creates an entity; the response is normalized
    Create,
    /// Deletes the entity under `key`
    Delete {
        /// Entry key
        key: String,
    },
    /// Updates the entity under `key`
    Update {
        /// Entry key
        key: String,
    },
}

impl MutationIntent {
    /// Classify a mutation operation
    ///
    /// Returns `None` when the intent cannot be told apart: several root
    /// fields, an unmapped field, no arguments, or no usable identifier.
    pub fn classify(
        prototype: &Prototype,
        maps: &TypeMaps,
        identifiers: &IdentifierFields,
    ) -> Option<Self> {
        let [field] = prototype.fields.as_slice() else {
            return None;
        };
        let type_name = maps.type_of(&field.name)?;

        let lowered = field.name.to_lowercase();
        if CREATE_VERBS.iter().any(|verb| lowered.contains(verb)) {
            return Some(MutationIntent::Create);
        }

        match field.arguments.as_slice() {
            [] => None,
            [(_, value)] => Some(MutationIntent::Delete {
                key: entry_key(type_name, &value.as_identifier()?),
            }),
            arguments => {
                let (_, value) = arguments
                    .iter()
                    .find(|(name, _)| identifiers.contains(name))?;
                Some(MutationIntent::Update {
                    key: entry_key(type_name, &value.as_identifier()?),
                })
            }
        }
    }

    /// Apply this intent to the store, given the server's response data
    pub fn apply(
        &self,
        store: &NormalizedStore,
        prototype: &Prototype,
        data: &Map<String, Value>,
        identifiers: &IdentifierFields,
    ) -> quellstore::Result<()> {
        match self {
            MutationIntent::Create => {
                Normalizer::new(store, identifiers).normalize(data, prototype)?;
            }
            MutationIntent::Delete { key } => {
                store.remove(key)?;
                let pruned = store.prune_references(key)?;
                debug!("Deleted {} and pruned {} references", key, pruned);
            }
            MutationIntent::Update { key } => {
                let returned = prototype
                    .fields
                    .first()
                    .and_then(|field| Some((field, data.get(field.response_key())?)));

                match returned {
                    Some((field, Value::Object(object))) => {
                        let patch: Map<String, Value> = field
                            .children()
                            .iter()
                            .filter(|c| c.is_scalar())
                            .filter_map(|c| {
                                let value = object.get(c.response_key())?;
                                Some((c.storage_key(), value.clone()))
                            })
                            .collect();
                        let patched = store.patch_fields(key, patch)?;
                        debug!("Patched {}: {}", key, patched);
                    }
                    _ => {
                        store.remove(key)?;
                        debug!("Dropped {}: update returned no object", key);
                    }
                }
            }
        }
        Ok(())
    }
}
